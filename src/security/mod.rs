pub mod audit_log;
pub mod csrf;
pub mod field_cipher;
