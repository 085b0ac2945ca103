//! Proxy configuration.
//!
//! Configuration is read from the environment. Keys are prefixed with
//! `P402_` by default; set `P402_ENV_PREFIX` to change the prefix (the
//! prefix is prepended to every key below before lookup).
//!
//! | Key | Effect |
//! |---|---|
//! | `PORT` | TCP listen port (default 8402) |
//! | `HOST` | bind address (default 127.0.0.1) |
//! | `WALLET_MODE` | optional `eoa` / `smart-account`; checked against the keys below |
//! | `WALLET_PRIVATE_KEY` | 0x-prefixed hex EOA key (EOA mode) |
//! | `WALLET_SMART_ACCOUNT_ADDRESS` | smart account address (smart-account mode) |
//! | `WALLET_SESSION_KEY_PRIVATE_KEY` | session signer key (smart-account mode) |
//! | `WALLET_VALIDATOR_ADDRESS` | ownable-validator module (default fixed constant) |
//! | `WALLET_CHAIN_ID` | chain id for the smart account (default 84532) |
//! | `TREASURER_POLICY_API_URL` | remote policy service; naive treasurer if unset |
//! | `TREASURER_TIMEOUT_MS` | policy service timeout (default 30000) |
//!
//! The two wallet modes are mutually exclusive; invalid combinations fail
//! at startup with an error naming the offending keys.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use alloy_signer_local::PrivateKeySigner;
use url::Url;

use p402_treasurer::{ApiClient, NaiveTreasurer, RemoteTreasurer, Treasurer};
use p402_wallet::{DEFAULT_CHAIN_ID, EoaWallet, OWNABLE_VALIDATOR, SmartAccountWallet, Wallet};

/// Default prefix prepended to configuration keys.
pub const DEFAULT_ENV_PREFIX: &str = "P402_";

const DEFAULT_PORT: u16 = 8402;

/// Configuration errors. Fatal at startup.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A required key is absent.
    #[error("missing configuration: set {0}")]
    MissingKey(String),

    /// Two mutually exclusive keys are both set.
    #[error("conflicting configuration: {0}")]
    Conflicting(String),

    /// A key is present but does not parse.
    #[error("invalid value for {key}: {message}")]
    InvalidValue {
        /// The offending key (unprefixed).
        key: String,
        /// What went wrong.
        message: String,
    },
}

/// Wallet mode and credentials.
#[derive(Debug, Clone)]
pub enum WalletConfig {
    /// Externally-owned account.
    Eoa {
        /// 0x-prefixed hex private key.
        private_key: String,
    },
    /// ERC-4337 smart account with a session key.
    SmartAccount {
        /// The smart account address.
        account: Address,
        /// 0x-prefixed hex session key.
        session_key: String,
        /// Ownable-validator module address.
        validator: Address,
        /// Chain the account lives on.
        chain_id: u64,
    },
}

impl WalletConfig {
    /// The key used for signing, both payments (EOA) and policy-service
    /// logins (both modes).
    #[must_use]
    pub fn signer_key(&self) -> &str {
        match self {
            Self::Eoa { private_key } => private_key,
            Self::SmartAccount { session_key, .. } => session_key,
        }
    }

    /// Builds the wallet.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if a key does not parse.
    pub fn build(&self) -> Result<Arc<dyn Wallet>, ConfigError> {
        match self {
            Self::Eoa { private_key } => {
                let signer = parse_key(private_key, "WALLET_PRIVATE_KEY")?;
                Ok(Arc::new(EoaWallet::new(signer)))
            }
            Self::SmartAccount {
                account,
                session_key,
                validator,
                chain_id,
            } => {
                let signer = parse_key(session_key, "WALLET_SESSION_KEY_PRIVATE_KEY")?;
                Ok(Arc::new(
                    SmartAccountWallet::new(*account, signer)
                        .with_validator(*validator)
                        .with_chain_id(*chain_id),
                ))
            }
        }
    }
}

/// Treasurer selection.
#[derive(Debug, Clone)]
pub struct TreasurerConfig {
    /// Remote policy service URL; the naive treasurer is used when unset.
    pub policy_api_url: Option<Url>,
    /// Policy service request timeout.
    pub timeout: Duration,
}

/// Full proxy configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Bind address.
    pub host: IpAddr,
    /// Listen port.
    pub port: u16,
    /// Wallet mode and credentials.
    pub wallet: WalletConfig,
    /// Treasurer selection.
    pub treasurer: TreasurerConfig,
}

impl ProxyConfig {
    /// Loads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] describing the exact missing or conflicting
    /// keys.
    pub fn from_env() -> Result<Self, ConfigError> {
        let prefix =
            std::env::var("P402_ENV_PREFIX").unwrap_or_else(|_| DEFAULT_ENV_PREFIX.to_owned());
        Self::from_lookup(|key| std::env::var(format!("{prefix}{key}")).ok())
    }

    /// Loads configuration through an arbitrary key lookup. Keys are
    /// unprefixed (`"PORT"`, `"WALLET_PRIVATE_KEY"`, …); empty values count
    /// as absent.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] describing the exact missing or conflicting
    /// keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let host: IpAddr = match get("HOST") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "HOST".to_owned(),
                message: format!("not an IP address: {raw}"),
            })?,
            None => IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
        };
        let port: u16 = match get("PORT") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "PORT".to_owned(),
                message: format!("not a port number: {raw}"),
            })?,
            None => DEFAULT_PORT,
        };

        let wallet = Self::wallet_from_lookup(&get)?;
        let treasurer = Self::treasurer_from_lookup(&get)?;

        Ok(Self {
            host,
            port,
            wallet,
            treasurer,
        })
    }

    fn wallet_from_lookup(
        get: &impl Fn(&str) -> Option<String>,
    ) -> Result<WalletConfig, ConfigError> {
        let eoa_key = get("WALLET_PRIVATE_KEY");
        let account = get("WALLET_SMART_ACCOUNT_ADDRESS");
        let session_key = get("WALLET_SESSION_KEY_PRIVATE_KEY");

        if eoa_key.is_some() && (account.is_some() || session_key.is_some()) {
            return Err(ConfigError::Conflicting(
                "WALLET_PRIVATE_KEY is mutually exclusive with \
                 WALLET_SMART_ACCOUNT_ADDRESS / WALLET_SESSION_KEY_PRIVATE_KEY"
                    .to_owned(),
            ));
        }

        // WALLET_MODE is optional; when set it must agree with the
        // credentials that are actually present.
        if let Some(mode) = get("WALLET_MODE") {
            let declared_eoa = match mode.as_str() {
                "eoa" => true,
                "smart-account" => false,
                other => {
                    return Err(ConfigError::InvalidValue {
                        key: "WALLET_MODE".to_owned(),
                        message: format!("expected \"eoa\" or \"smart-account\", got {other}"),
                    });
                }
            };
            if declared_eoa != eoa_key.is_some() {
                return Err(ConfigError::Conflicting(format!(
                    "WALLET_MODE={mode} does not match the wallet credentials that are set"
                )));
            }
        }

        if let Some(private_key) = eoa_key {
            return Ok(WalletConfig::Eoa { private_key });
        }

        match (account, session_key) {
            (Some(account), Some(session_key)) => {
                let account: Address =
                    account.parse().map_err(|_| ConfigError::InvalidValue {
                        key: "WALLET_SMART_ACCOUNT_ADDRESS".to_owned(),
                        message: format!("not an address: {account}"),
                    })?;
                let validator = match get("WALLET_VALIDATOR_ADDRESS") {
                    Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                        key: "WALLET_VALIDATOR_ADDRESS".to_owned(),
                        message: format!("not an address: {raw}"),
                    })?,
                    None => OWNABLE_VALIDATOR,
                };
                let chain_id = match get("WALLET_CHAIN_ID") {
                    Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                        key: "WALLET_CHAIN_ID".to_owned(),
                        message: format!("not a chain id: {raw}"),
                    })?,
                    None => DEFAULT_CHAIN_ID,
                };
                Ok(WalletConfig::SmartAccount {
                    account,
                    session_key,
                    validator,
                    chain_id,
                })
            }
            (Some(_), None) => Err(ConfigError::MissingKey(
                "WALLET_SESSION_KEY_PRIVATE_KEY (required with WALLET_SMART_ACCOUNT_ADDRESS)"
                    .to_owned(),
            )),
            (None, Some(_)) => Err(ConfigError::MissingKey(
                "WALLET_SMART_ACCOUNT_ADDRESS (required with WALLET_SESSION_KEY_PRIVATE_KEY)"
                    .to_owned(),
            )),
            (None, None) => Err(ConfigError::MissingKey(
                "WALLET_PRIVATE_KEY, or WALLET_SMART_ACCOUNT_ADDRESS + \
                 WALLET_SESSION_KEY_PRIVATE_KEY"
                    .to_owned(),
            )),
        }
    }

    fn treasurer_from_lookup(
        get: &impl Fn(&str) -> Option<String>,
    ) -> Result<TreasurerConfig, ConfigError> {
        let policy_api_url = match get("TREASURER_POLICY_API_URL") {
            Some(raw) => Some(raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "TREASURER_POLICY_API_URL".to_owned(),
                message: format!("not a URL: {raw}"),
            })?),
            None => None,
        };
        let timeout = match get("TREASURER_TIMEOUT_MS") {
            Some(raw) => {
                let ms: u64 = raw.parse().map_err(|_| ConfigError::InvalidValue {
                    key: "TREASURER_TIMEOUT_MS".to_owned(),
                    message: format!("not a duration in milliseconds: {raw}"),
                })?;
                Duration::from_millis(ms)
            }
            None => p402_treasurer::api::DEFAULT_TIMEOUT,
        };
        Ok(TreasurerConfig {
            policy_api_url,
            timeout,
        })
    }

    /// Builds the process-wide treasurer over `wallet`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the remote treasurer cannot be
    /// constructed.
    pub fn build_treasurer(
        &self,
        wallet: Arc<dyn Wallet>,
    ) -> Result<Arc<dyn Treasurer>, ConfigError> {
        match &self.treasurer.policy_api_url {
            Some(url) => {
                let signer = parse_key(self.wallet.signer_key(), "WALLET_*_PRIVATE_KEY")?;
                let api = ApiClient::new(url.clone(), signer, self.treasurer.timeout).map_err(
                    |e| ConfigError::InvalidValue {
                        key: "TREASURER_POLICY_API_URL".to_owned(),
                        message: e.to_string(),
                    },
                )?;
                Ok(Arc::new(RemoteTreasurer::new(api, wallet)))
            }
            None => Ok(Arc::new(NaiveTreasurer::new(wallet))),
        }
    }
}

fn parse_key(raw: &str, key: &str) -> Result<PrivateKeySigner, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_owned(),
        message: "not a 0x-prefixed 32-byte hex private key".to_owned(),
    })
}
