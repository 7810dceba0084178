mod error;
mod paths;
mod schema;
mod store;

pub use error::CredentialStoreError;
pub use paths::{credential_file_name, credential_root, DEFAULT_ACCOUNT};
pub use schema::{CookieRecord, CookieRecordType, RECORD_VERSION};
pub use store::{CookieStore, FileCookieStore, MemoryCookieStore};
