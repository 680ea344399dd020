use phf::phf_map;

static EN: phf::Map<&'static str, &'static str> = phf_map! {
    "welcome" => "Welcome to the SmartOPD queue bot! Please choose an option:",
    "unknown" => "I don't understand that. Please use the menu or type /help for available commands.",
    "cancelled" => "Registration cancelled.",
    "nothing_to_cancel" => "There is nothing to cancel.",
    "ask_name" => "Let's get you a token. What is the patient's full name?",
    "ask_phone" => "What phone number can we reach you on?",
    "ask_department" => "Which department? Reply with a number:",
    "ask_doctor" => "Which doctor? Reply with a number:",
    "ask_visit_type" => "Is this a walk-in or an appointment? Reply 1 for walk-in, 2 for appointment.",
    "ask_slot" => "Pick a time slot for today. Reply with a number:",
    "ask_alerts" => "How should we remind you? 1 none, 2 SMS, 3 WhatsApp, 4 both. You will always get alerts in this chat.",
    "invalid_choice" => "Please reply with one of the numbers shown, or /cancel.",
    "send_text" => "Please send a text message.",
    "no_departments" => "No departments are configured yet.",
    "no_doctors" => "No doctors found.",
    "no_slots" => "No time slots are left for this doctor today. Please register as a walk-in.",
    "departments" => "Departments",
    "doctors" => "Doctors",
    "registration_failed" => "Registration failed. Please try again.",
    "queue_empty" => "Nobody is waiting in this queue.",
    "login_required" => "Please sign in first with /login <email> <password>.",
    "forbidden" => "Your role is not allowed to do that.",
    "login_failed" => "Invalid email or password.",
    "logged_out" => "You have been signed out.",
    "internal_error" => "Something went wrong. Please try again later.",
};

static ES: phf::Map<&'static str, &'static str> = phf_map! {
    "welcome" => "¡Bienvenido al bot de turnos SmartOPD! Elija una opción:",
    "unknown" => "No entiendo. Use el menú o escriba /help para ver los comandos.",
    "cancelled" => "Registro cancelado.",
    "nothing_to_cancel" => "No hay nada que cancelar.",
    "ask_name" => "Vamos a darle un turno. ¿Cuál es el nombre completo del paciente?",
    "ask_phone" => "¿A qué número de teléfono podemos llamarle?",
    "ask_department" => "¿Qué departamento? Responda con un número:",
    "ask_doctor" => "¿Qué médico? Responda con un número:",
    "ask_visit_type" => "¿Es sin cita o con cita? Responda 1 sin cita, 2 con cita.",
    "ask_slot" => "Elija un horario para hoy. Responda con un número:",
    "ask_alerts" => "¿Cómo le avisamos? 1 nada, 2 SMS, 3 WhatsApp, 4 ambos. Siempre recibirá avisos en este chat.",
    "invalid_choice" => "Responda con uno de los números indicados, o /cancel.",
    "send_text" => "Por favor envíe un mensaje de texto.",
    "no_departments" => "Todavía no hay departamentos.",
    "no_doctors" => "No se encontraron médicos.",
    "no_slots" => "No quedan horarios hoy para este médico. Regístrese sin cita.",
    "departments" => "Departamentos",
    "doctors" => "Médicos",
    "registration_failed" => "El registro falló. Inténtelo de nuevo.",
    "queue_empty" => "No hay nadie esperando en esta cola.",
    "login_required" => "Primero inicie sesión con /login <correo> <contraseña>.",
    "forbidden" => "Su rol no permite esa acción.",
    "login_failed" => "Correo o contraseña incorrectos.",
    "logged_out" => "Ha cerrado la sesión.",
    "internal_error" => "Algo salió mal. Inténtelo más tarde.",
};

/// Looks a message up for the user's language, falling back to English.
pub fn text(lang: &str, key: &str) -> &'static str {
    let table = match lang.split(['-', '_']).next() {
        Some("es") => &ES,
        _ => &EN,
    };

    table
        .get(key)
        .or_else(|| EN.get(key))
        .copied()
        .unwrap_or_else(|| {
            log::warn!("Missing translation: {}", key);
            "…"
        })
}
