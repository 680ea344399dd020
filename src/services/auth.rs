use std::sync::Arc;

use dashmap::DashMap;
use rand::Rng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::Role;
use crate::services::{audit, required, ServiceError, ServiceResult};

/// Things staff can do; which roles may do them is decided by `Role::allows`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    ViewDirectory,
    CallNext,
    ManagePatients,
    ManageAppointments,
    ViewAudit,
    ManageStaff,
}

impl Role {
    pub fn allows(&self, permission: Permission) -> bool {
        match self {
            Role::SuperAdmin => true,
            Role::Doctor | Role::Receptionist => !matches!(
                permission,
                Permission::ViewAudit | Permission::ManageStaff
            ),
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StaffUser {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: Role,
    /// Set for doctor accounts tied to a doctor's queue.
    pub doctor_id: Option<Uuid>,
}

impl StaffUser {
    pub fn ensure(&self, permission: Permission) -> ServiceResult<()> {
        if self.role.allows(permission) {
            Ok(())
        } else {
            log::warn!("{} ({}) denied {:?}", self.email, self.role, permission);
            Err(ServiceError::Forbidden)
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewStaff {
    pub email: String,
    pub password: String,
    pub name: String,
    pub role: Role,
    pub doctor_id: Option<Uuid>,
}

/// Credential joined with its (possibly missing) profile.
#[derive(sqlx::FromRow, Debug, Clone)]
pub struct CredentialRecord {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub salt: String,
    pub name: Option<String>,
    pub role: Option<String>,
    pub doctor_id: Option<Uuid>,
}

impl CredentialRecord {
    /// A missing profile falls back to the email as name and receptionist rights.
    pub fn into_staff(self) -> StaffUser {
        let role = self
            .role
            .and_then(|tag| tag.parse().ok())
            .unwrap_or(Role::Receptionist);
        StaffUser {
            id: self.id,
            name: self.name.unwrap_or_else(|| self.email.clone()),
            email: self.email,
            role,
            doctor_id: self.doctor_id,
        }
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn new_salt() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

pub fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn verify_password(password: &str, salt: &str, expected_hash: &str) -> bool {
    let actual = hash_password(password, salt);
    actual.len() == expected_hash.len()
        && actual
            .bytes()
            .zip(expected_hash.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

pub async fn register(pool: &PgPool, new: NewStaff, performed_by: &str) -> ServiceResult<StaffUser> {
    let email = normalize_email(required("email", &new.email)?);
    let name = required("name", &new.name)?.to_string();
    if new.password.is_empty() {
        return Err(ServiceError::InvalidInput("password is required".to_string()));
    }

    let salt = new_salt();
    let password_hash = hash_password(&new.password, &salt);
    let id = Uuid::new_v4();

    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO credentials (id, email, password_hash, salt) VALUES ($1, $2, $3, $4)",
    )
    .bind(id)
    .bind(&email)
    .bind(&password_hash)
    .bind(&salt)
    .execute(&mut *tx)
    .await
    .map_err(|e| {
        let duplicate = matches!(&e, sqlx::Error::Database(db) if db.is_unique_violation());
        if duplicate {
            ServiceError::DuplicateEmail(email.clone())
        } else {
            ServiceError::Sqlx(e)
        }
    })?;

    sqlx::query("INSERT INTO profiles (id, name, role, doctor_id) VALUES ($1, $2, $3, $4)")
        .bind(id)
        .bind(&name)
        .bind(new.role.as_str())
        .bind(new.doctor_id)
        .execute(&mut *tx)
        .await?;

    audit::record(
        &mut *tx,
        audit::REGISTER_STAFF,
        performed_by,
        &email,
        &format!("Created {} account for {}", new.role, name),
    )
    .await?;

    tx.commit().await?;

    log::info!("Registered staff account {} as {}", email, new.role);
    Ok(StaffUser {
        id,
        email,
        name,
        role: new.role,
        doctor_id: new.doctor_id,
    })
}

pub async fn login(pool: &PgPool, email: &str, password: &str) -> ServiceResult<StaffUser> {
    let email = normalize_email(email);

    let record = sqlx::query_as::<_, CredentialRecord>(
        "SELECT c.id, c.email, c.password_hash, c.salt, p.name, p.role, p.doctor_id \
         FROM credentials c LEFT JOIN profiles p ON p.id = c.id \
         WHERE c.email = $1",
    )
    .bind(&email)
    .fetch_optional(pool)
    .await?;

    match record {
        Some(record) if verify_password(password, &record.salt, &record.password_hash) => {
            log::info!("Staff login for {}", email);
            Ok(record.into_staff())
        }
        _ => {
            log::warn!("Failed login for {}", email);
            Err(ServiceError::InvalidCredentials)
        }
    }
}

/// Who is signed in on which chat.
#[derive(Clone, Default)]
pub struct Sessions {
    inner: Arc<DashMap<i64, StaffUser>>,
}

impl Sessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sign_in(&self, chat_id: i64, user: StaffUser) {
        self.inner.insert(chat_id, user);
    }

    pub fn sign_out(&self, chat_id: i64) -> Option<StaffUser> {
        self.inner.remove(&chat_id).map(|(_, user)| user)
    }

    pub fn current(&self, chat_id: i64) -> Option<StaffUser> {
        self.inner.get(&chat_id).map(|entry| entry.value().clone())
    }

    pub fn is_authenticated(&self, chat_id: i64) -> bool {
        self.inner.contains_key(&chat_id)
    }

    pub fn role(&self, chat_id: i64) -> Option<Role> {
        self.inner.get(&chat_id).map(|entry| entry.role)
    }
}
