//! Wallet - arbitrator key storage and transaction signing
//!
//! `LocalWallet` keeps ed25519 secrets in a JSON keystore. Each secret is
//! sealed with AES-256-GCM under a key derived by scrypt from the password
//! and a per-account salt; the account's public key is the associated data,
//! so a wrong password or a swapped entry fails authentication.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit, Payload as AeadPayload};
use aes_gcm::{Aes256Gcm, Nonce};
use cross_chain_types::{Program, PublicKey, Signature, Transaction};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use parking_lot::RwLock;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::WalletError;

const KEYSTORE_VERSION: u32 = 2;
const SALT_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const DERIVED_KEY_LEN: usize = 32;

/// scrypt cost `log2(N)` for new accounts
pub const DEFAULT_SCRYPT_LOG_N: u8 = 15;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;
const MAX_SCRYPT_LOG_N: u8 = 20;

pub trait Wallet: Send + Sync {
    /// Check the password and return the account's key
    fn unlock(&self, name: &str, password: &str) -> Result<PublicKey, WalletError>;

    /// Signature over the transaction hash
    fn sign(&self, name: &str, password: &str, tx: &Transaction) -> Result<Signature, WalletError>;

    /// (signatures present, signatures required) of a program
    fn sign_status(&self, program: &Program) -> (usize, usize) {
        (
            program.signature_count(),
            program.required_signatures().unwrap_or(1),
        )
    }
}

/// Verify an ed25519 signature made by `key`
pub fn verify_signature(key: &PublicKey, message: &[u8], signature: &Signature) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_bytes(key.as_bytes()) else {
        return false;
    };
    let signature = ed25519_dalek::Signature::from_bytes(signature.as_bytes());
    verifying_key.verify_strict(message, &signature).is_ok()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ScryptParams {
    log_n: u8,
    r: u32,
    p: u32,
    salt: String,
}

impl ScryptParams {
    fn derive_key(&self, password: &str) -> Result<[u8; DERIVED_KEY_LEN], WalletError> {
        if self.log_n == 0 || self.log_n > MAX_SCRYPT_LOG_N {
            return Err(WalletError::Corrupted(format!("scrypt cost {} out of range", self.log_n)));
        }
        let salt = decode_b58("salt", &self.salt)?;
        let params = scrypt::Params::new(self.log_n, self.r, self.p, DERIVED_KEY_LEN)
            .map_err(|e| WalletError::Corrupted(format!("scrypt params: {}", e)))?;

        let mut key = [0u8; DERIVED_KEY_LEN];
        scrypt::scrypt(password.as_bytes(), &salt, &params, &mut key)
            .map_err(|e| WalletError::Corrupted(format!("scrypt: {}", e)))?;
        Ok(key)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeystoreEntry {
    name: String,
    public_key: PublicKey,
    kdf: ScryptParams,
    nonce: String,
    ciphertext: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct KeystoreFile {
    version: u32,
    accounts: Vec<KeystoreEntry>,
}

fn decode_b58(field: &str, value: &str) -> Result<Vec<u8>, WalletError> {
    bs58::decode(value)
        .into_vec()
        .map_err(|e| WalletError::Corrupted(format!("{}: {}", field, e)))
}

impl KeystoreEntry {
    fn seal(name: &str, password: &str, key: &SigningKey, log_n: u8) -> Result<Self, WalletError> {
        let mut rng = rand::thread_rng();
        let mut salt = [0u8; SALT_LEN];
        rng.fill_bytes(&mut salt);
        let mut nonce = [0u8; NONCE_LEN];
        rng.fill_bytes(&mut nonce);

        let public_key = PublicKey::new(key.verifying_key().to_bytes());
        let kdf = ScryptParams {
            log_n,
            r: SCRYPT_R,
            p: SCRYPT_P,
            salt: bs58::encode(salt).into_string(),
        };
        let cipher = Aes256Gcm::new_from_slice(&kdf.derive_key(password)?)
            .map_err(|e| WalletError::Corrupted(e.to_string()))?;
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                AeadPayload {
                    msg: key.as_bytes(),
                    aad: public_key.as_bytes(),
                },
            )
            .map_err(|e| WalletError::Corrupted(format!("sealing {}: {}", name, e)))?;

        Ok(Self {
            name: name.to_string(),
            public_key,
            kdf,
            nonce: bs58::encode(nonce).into_string(),
            ciphertext: bs58::encode(ciphertext).into_string(),
        })
    }

    fn open(&self, password: &str) -> Result<SigningKey, WalletError> {
        let nonce = decode_b58("nonce", &self.nonce)?;
        if nonce.len() != NONCE_LEN {
            return Err(WalletError::Corrupted("nonce length".to_string()));
        }
        let ciphertext = decode_b58("ciphertext", &self.ciphertext)?;

        let cipher = Aes256Gcm::new_from_slice(&self.kdf.derive_key(password)?)
            .map_err(|e| WalletError::Corrupted(e.to_string()))?;
        let secret = cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                AeadPayload {
                    msg: &ciphertext,
                    aad: self.public_key.as_bytes(),
                },
            )
            .map_err(|_| WalletError::WrongPassword(self.name.clone()))?;
        let secret: [u8; 32] = secret
            .try_into()
            .map_err(|_| WalletError::Corrupted("secret length".to_string()))?;

        let key = SigningKey::from_bytes(&secret);
        if key.verifying_key().to_bytes() != *self.public_key.as_bytes() {
            return Err(WalletError::Corrupted(format!(
                "public key of {} does not match its secret",
                self.name
            )));
        }
        Ok(key)
    }
}

/// Key opened once, reused while the same password is presented
struct Unlocked {
    password_digest: blake3::Hash,
    key: SigningKey,
}

fn password_digest(entry: &KeystoreEntry, password: &str) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(entry.kdf.salt.as_bytes());
    hasher.update(password.as_bytes());
    hasher.finalize()
}

/// File-backed ed25519 wallet
pub struct LocalWallet {
    path: Option<PathBuf>,
    accounts: RwLock<BTreeMap<String, KeystoreEntry>>,
    unlocked: RwLock<BTreeMap<String, Unlocked>>,
    scrypt_log_n: u8,
}

impl LocalWallet {
    /// Wallet that lives only in memory until `save_to` is called
    pub fn in_memory() -> Self {
        Self {
            path: None,
            accounts: RwLock::new(BTreeMap::new()),
            unlocked: RwLock::new(BTreeMap::new()),
            scrypt_log_n: DEFAULT_SCRYPT_LOG_N,
        }
    }

    /// scrypt cost for accounts added from now on; entries keep their own
    pub fn with_scrypt_cost(mut self, log_n: u8) -> Self {
        self.scrypt_log_n = log_n;
        self
    }

    /// Load a keystore file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, WalletError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)?;
        let file: KeystoreFile = serde_json::from_str(&data)?;
        if file.version != KEYSTORE_VERSION {
            return Err(WalletError::Corrupted(format!(
                "unsupported keystore version {}",
                file.version
            )));
        }

        let accounts = file
            .accounts
            .into_iter()
            .map(|entry| (entry.name.clone(), entry))
            .collect();
        tracing::info!("Loaded keystore {}", path.display());

        Ok(Self {
            path: Some(path.to_path_buf()),
            accounts: RwLock::new(accounts),
            unlocked: RwLock::new(BTreeMap::new()),
            scrypt_log_n: DEFAULT_SCRYPT_LOG_N,
        })
    }

    /// Create a keystore with one freshly generated account
    pub fn create<P: AsRef<Path>>(path: P, name: &str, password: &str) -> Result<Self, WalletError> {
        Self::create_with_cost(path, name, password, DEFAULT_SCRYPT_LOG_N)
    }

    pub fn create_with_cost<P: AsRef<Path>>(
        path: P,
        name: &str,
        password: &str,
        scrypt_log_n: u8,
    ) -> Result<Self, WalletError> {
        let mut wallet = Self::in_memory().with_scrypt_cost(scrypt_log_n);
        wallet.path = Some(path.as_ref().to_path_buf());
        wallet.generate_account(name, password)?;
        wallet.save()?;
        Ok(wallet)
    }

    pub fn generate_account(&self, name: &str, password: &str) -> Result<PublicKey, WalletError> {
        let key = SigningKey::generate(&mut rand::rngs::OsRng);
        self.import_account(name, password, &key)
    }

    pub fn import_account(
        &self,
        name: &str,
        password: &str,
        key: &SigningKey,
    ) -> Result<PublicKey, WalletError> {
        let mut accounts = self.accounts.write();
        if accounts.contains_key(name) {
            return Err(WalletError::DuplicateAccount(name.to_string()));
        }
        let entry = KeystoreEntry::seal(name, password, key, self.scrypt_log_n)?;
        let public_key = entry.public_key;
        accounts.insert(name.to_string(), entry);
        Ok(public_key)
    }

    pub fn public_key(&self, name: &str) -> Option<PublicKey> {
        self.accounts.read().get(name).map(|e| e.public_key)
    }

    /// Write to the file the wallet was opened from or created at
    pub fn save(&self) -> Result<(), WalletError> {
        match &self.path {
            Some(path) => self.save_to(path),
            None => Ok(()),
        }
    }

    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<(), WalletError> {
        let file = KeystoreFile {
            version: KEYSTORE_VERSION,
            accounts: self.accounts.read().values().cloned().collect(),
        };
        std::fs::write(path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }

    fn signing_key(&self, name: &str, password: &str) -> Result<SigningKey, WalletError> {
        let accounts = self.accounts.read();
        let entry = accounts
            .get(name)
            .ok_or_else(|| WalletError::UnknownAccount(name.to_string()))?;

        let digest = password_digest(entry, password);
        if let Some(unlocked) = self.unlocked.read().get(name) {
            if unlocked.password_digest == digest {
                return Ok(unlocked.key.clone());
            }
        }

        let key = entry.open(password)?;
        self.unlocked.write().insert(
            name.to_string(),
            Unlocked {
                password_digest: digest,
                key: key.clone(),
            },
        );
        Ok(key)
    }
}

impl Wallet for LocalWallet {
    fn unlock(&self, name: &str, password: &str) -> Result<PublicKey, WalletError> {
        let key = self.signing_key(name, password)?;
        Ok(PublicKey::new(key.verifying_key().to_bytes()))
    }

    fn sign(&self, name: &str, password: &str, tx: &Transaction) -> Result<Signature, WalletError> {
        let key = self.signing_key(name, password)?;
        let signature = key.sign(tx.hash().as_bytes());
        Ok(Signature::new(signature.to_bytes()))
    }
}

/// Unlocked account used by the proposal server and client
pub struct AccountSigner {
    wallet: Arc<dyn Wallet>,
    account: String,
    password: String,
    public_key: PublicKey,
}

impl AccountSigner {
    /// Fails if the account is missing or the password is wrong
    pub fn new(wallet: Arc<dyn Wallet>, account: &str, password: &str) -> Result<Self, WalletError> {
        let public_key = wallet.unlock(account, password)?;
        Ok(Self {
            wallet,
            account: account.to_string(),
            password: password.to_string(),
            public_key,
        })
    }

    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    pub fn sign(&self, tx: &Transaction) -> Result<Signature, WalletError> {
        self.wallet.sign(&self.account, &self.password, tx)
    }

    pub fn sign_status(&self, program: &Program) -> (usize, usize) {
        self.wallet.sign_status(program)
    }
}
