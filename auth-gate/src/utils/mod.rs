pub mod password;
pub mod qr;
pub mod validation;

pub use password::{hash_password, verify_password, Password, PasswordHashString};
pub use qr::qr_data_uri;
pub use validation::ValidatedJson;
