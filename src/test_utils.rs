use std::sync::{Mutex, OnceLock};

/// Global lock for environment variable modifications in tests.
/// Children inherit the process environment at spawn time, so tests that set
/// or remove variables must hold this lock while they launch anything.
pub static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

pub fn env_lock() -> std::sync::MutexGuard<'static, ()> {
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
