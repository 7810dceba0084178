use std::path::{Path, PathBuf};

pub const CREDENTIAL_DIR: [&str; 2] = [".gemini_web", "credentials"];
pub const DEFAULT_ACCOUNT: &str = "default";

#[must_use]
pub fn credential_root(home: &Path) -> PathBuf {
    home.join(CREDENTIAL_DIR[0]).join(CREDENTIAL_DIR[1])
}

#[must_use]
pub fn sanitize_account_for_filename(account: &str) -> String {
    let cleaned: String = account
        .trim()
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' | '@' => c,
            _ => '-',
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        DEFAULT_ACCOUNT.to_owned()
    } else {
        cleaned.to_owned()
    }
}

#[must_use]
pub fn credential_file_name(account: &str) -> String {
    format!("{}.json", sanitize_account_for_filename(account))
}
