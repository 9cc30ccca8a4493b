use crate::domain::error::ValidationErrors;

pub const PASSWORD_MIN: usize = 8;
const NAME_MAX: usize = 255;

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Checks that need no storage. Email uniqueness is enforced by the repository.
pub fn validate_new_user(email: &str, name: &str, password: &str) -> ValidationErrors {
    let mut errors = ValidationErrors::new();

    if email.is_empty() {
        errors.add("email", "can't be blank");
    } else if !looks_like_email(email) {
        errors.add("email", "is invalid");
    }
    if name.trim().is_empty() {
        errors.add("name", "can't be blank");
    } else if name.chars().count() > NAME_MAX {
        errors.add("name", format!("is too long (maximum is {NAME_MAX} characters)"));
    }
    if password.chars().count() < PASSWORD_MIN {
        errors.add(
            "password",
            format!("is too short (minimum is {PASSWORD_MIN} characters)"),
        );
    }

    errors
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    }
}
