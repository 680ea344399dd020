use envconfig::Envconfig;
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use smartopd::config::SeedConfig;
use smartopd::db::{self, models::Role};
use smartopd::services::{auth, ServiceError};

type Error = Box<dyn std::error::Error + Send + Sync>;

const REFERENCE_DATA: &str = include_str!("../seed/reference.json");

#[derive(Deserialize, Debug, Clone, PartialEq)]
struct SeedDoctor {
    name: String,
    specialization: String,
    #[serde(default = "available_by_default")]
    available: bool,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
struct SeedDepartment {
    name: String,
    #[serde(default)]
    description: String,
    doctors: Vec<SeedDoctor>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
struct ReferenceData {
    departments: Vec<SeedDepartment>,
}

fn available_by_default() -> bool {
    true
}

fn get_seed_data() -> Result<ReferenceData, serde_json::Error> {
    serde_json::from_str(REFERENCE_DATA)
}

/// Inserts departments and their doctors. Departments are matched by name,
/// so running the seed twice does not duplicate them.
async fn seed_reference_data(pool: &PgPool, data: &ReferenceData) -> Result<(), sqlx::Error> {
    for department in &data.departments {
        let department_id: Uuid = sqlx::query_scalar(
            "INSERT INTO departments (id, name, description) VALUES ($1, $2, $3) \
             ON CONFLICT (name) DO UPDATE SET description = EXCLUDED.description \
             RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(&department.name)
        .bind(&department.description)
        .fetch_one(pool)
        .await?;

        for doctor in &department.doctors {
            sqlx::query(
                "INSERT INTO doctors (id, name, department_id, specialization, available) \
                 SELECT $1, $2, $3, $4, $5 \
                 WHERE NOT EXISTS (SELECT 1 FROM doctors WHERE name = $2 AND department_id = $3)",
            )
            .bind(Uuid::new_v4())
            .bind(&doctor.name)
            .bind(department_id)
            .bind(&doctor.specialization)
            .bind(doctor.available)
            .execute(pool)
            .await?;
        }

        log::info!(
            "Seeded {} with {} doctor(s)",
            department.name,
            department.doctors.len()
        );
    }

    Ok(())
}

async fn seed_admin(pool: &PgPool, config: &SeedConfig) -> Result<(), Error> {
    let (Some(email), Some(password)) = (&config.admin_email, &config.admin_password) else {
        log::info!("SEED_ADMIN_EMAIL/SEED_ADMIN_PASSWORD not set, skipping admin account");
        return Ok(());
    };

    let admin = auth::NewStaff {
        email: email.clone(),
        password: password.clone(),
        name: config.admin_name.clone(),
        role: Role::SuperAdmin,
        doctor_id: None,
    };

    match auth::register(pool, admin, "SEED").await {
        Ok(user) => log::info!("Created super admin {}", user.email),
        Err(ServiceError::DuplicateEmail(email)) => {
            log::info!("Super admin {} already exists", email)
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
    dotenvy::dotenv().ok();

    let config = SeedConfig::init_from_env()?;
    let pool = db::init_db(&config.database_url).await?;

    let data = get_seed_data()?;
    seed_reference_data(&pool, &data).await?;
    seed_admin(&pool, &config).await?;

    log::info!("Seeding finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_reference_data_parses() {
        let data = get_seed_data().unwrap();
        assert!(!data.departments.is_empty());
        assert!(data.departments.iter().all(|d| !d.doctors.is_empty()));
        assert!(data
            .departments
            .iter()
            .flat_map(|d| &d.doctors)
            .all(|doctor| doctor.available));
    }

    #[test]
    fn department_names_are_unique() {
        let data = get_seed_data().unwrap();
        let mut names: Vec<&str> = data.departments.iter().map(|d| d.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), data.departments.len());
    }

    #[test]
    fn availability_defaults_to_true() {
        let doctor: SeedDoctor =
            serde_json::from_str(r#"{ "name": "Dr. A", "specialization": "ENT" }"#).unwrap();
        assert!(doctor.available);
    }
}
