use azvm_common::settings::WaitPolicy;
use rand::Rng;

pub const VM_SIZE: &str = "Standard_DS1_v2";
pub const ADMIN_USERNAME: &str = "userlogin";

const ACCOUNT_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const ACCOUNT_PREFIX: &str = "azvm";
const ACCOUNT_RANDOM_LENGTH: usize = 20;

const PASSWORD_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const PASSWORD_SYMBOLS: &[u8] = b"!@#%^*-_=+";
const PASSWORD_LENGTH: usize = 24;

/// Every resource name used by one run, derived from a single random suffix.
///
/// Names are not idempotent across runs: re-running against a subscription
/// that still holds a previous run's group collides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunNames {
    pub suffix: u32,
    pub group: String,
    pub storage_account: String,
    pub vnet: String,
    pub subnet: String,
    pub os_disk: String,
    pub ip_config: String,
    pub nic: String,
    pub vm: String,
    pub data_disk: String,
}

impl RunNames {
    pub fn generate() -> Self {
        Self::with_suffix(random_suffix(), random_storage_account_name())
    }

    pub fn with_suffix(suffix: u32, storage_account: impl Into<String>) -> Self {
        Self {
            suffix,
            group: format!("azure-sample-group-virtual-machines{}", suffix),
            storage_account: storage_account.into(),
            vnet: format!("azure-sample-vnet{}", suffix),
            subnet: format!("azure-sample-subnet{}", suffix),
            os_disk: format!("azure-sample-osdisk{}", suffix),
            ip_config: format!("azure-sample-ip-config{}", suffix),
            nic: format!("azure-sample-nic{}", suffix),
            vm: format!("VmName{}", suffix),
            data_disk: "mydatadisk1".to_string(),
        }
    }
}

/// Suffix in `100..=500`.
fn random_suffix() -> u32 {
    rand::thread_rng().gen_range(100..=500)
}

fn random_chars(rng: &mut impl Rng, charset: &[u8], length: usize) -> String {
    (0..length)
        .map(|_| {
            let idx = rng.gen_range(0..charset.len());
            charset[idx] as char
        })
        .collect()
}

/// Storage account names are global, 3-24 chars, lowercase alphanumeric.
fn random_storage_account_name() -> String {
    let mut rng = rand::thread_rng();
    format!(
        "{}{}",
        ACCOUNT_PREFIX,
        random_chars(&mut rng, ACCOUNT_CHARSET, ACCOUNT_RANDOM_LENGTH)
    )
}

/// The service wants three of: upper, lower, digit, symbol. The fixed tail
/// guarantees all four.
fn random_password() -> String {
    let mut rng = rand::thread_rng();
    let mut password = random_chars(&mut rng, PASSWORD_CHARSET, PASSWORD_LENGTH - 4);
    password.push(rng.gen_range(b'A'..=b'Z') as char);
    password.push(rng.gen_range(b'a'..=b'z') as char);
    password.push(rng.gen_range(b'0'..=b'9') as char);
    password.push_str(&random_chars(&mut rng, PASSWORD_SYMBOLS, 1));
    password
}

#[derive(Clone)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
}

impl AdminCredentials {
    pub fn generate() -> Self {
        Self {
            username: ADMIN_USERNAME.to_string(),
            password: random_password(),
        }
    }
}

impl std::fmt::Debug for AdminCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Explicit per-run context handed to every component.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub names: RunNames,
    pub location: String,
    pub admin: AdminCredentials,
    pub vm_size: String,
    pub wait: WaitPolicy,
}

impl RunContext {
    pub fn new(location: impl Into<String>, wait: WaitPolicy) -> Self {
        Self::with_names(RunNames::generate(), location, wait)
    }

    pub fn with_names(names: RunNames, location: impl Into<String>, wait: WaitPolicy) -> Self {
        Self {
            names,
            location: location.into(),
            admin: AdminCredentials::generate(),
            vm_size: VM_SIZE.to_string(),
            wait,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_share_the_suffix() {
        let names = RunNames::with_suffix(321, "acct");
        assert_eq!(names.group, "azure-sample-group-virtual-machines321");
        assert_eq!(names.nic, "azure-sample-nic321");
        assert_eq!(names.vm, "VmName321");
        assert_eq!(names.data_disk, "mydatadisk1");
    }

    #[test]
    fn generated_names_are_in_range_and_valid() {
        for _ in 0..50 {
            let names = RunNames::generate();
            assert!((100..=500).contains(&names.suffix));
            let acct = &names.storage_account;
            assert_eq!(acct.len(), 24);
            assert!(acct.starts_with(ACCOUNT_PREFIX));
            assert!(acct.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn password_meets_complexity_rules() {
        for _ in 0..50 {
            let password = AdminCredentials::generate().password;
            assert_eq!(password.len(), PASSWORD_LENGTH);
            assert!(password.chars().any(|c| c.is_ascii_uppercase()));
            assert!(password.chars().any(|c| c.is_ascii_lowercase()));
            assert!(password.chars().any(|c| c.is_ascii_digit()));
            assert!(password.bytes().any(|b| PASSWORD_SYMBOLS.contains(&b)));
        }
        assert_ne!(AdminCredentials::generate().password, AdminCredentials::generate().password);
    }

    #[test]
    fn suffixes_vary_between_runs() {
        let suffixes: std::collections::HashSet<u32> = (0..50).map(|_| random_suffix()).collect();
        assert!(suffixes.len() > 1);
        let accounts: std::collections::HashSet<String> =
            (0..10).map(|_| random_storage_account_name()).collect();
        assert_eq!(accounts.len(), 10);
    }

    #[test]
    fn password_is_redacted() {
        let admin = AdminCredentials::generate();
        assert!(!format!("{:?}", admin).contains(&admin.password));
    }
}
