use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::crypto::{hash_blake3, sign, verify, Hash, PublicKey, SecretKey, Sig};
use crate::error::CoreError;
use crate::serialize;

/// An account-model value transfer. Uniqueness comes from the
/// (timestamp, salt) pair rather than account nonces, and the same pair
/// fixes the transaction's position inside a proposed block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Chain ID for replay protection
    pub chain_id: u64,
    /// Sender's public key
    pub from: PublicKey,
    /// Recipient's public key
    pub to: PublicKey,
    /// Transferred amount; summed per block into the total transaction value
    pub amount: u64,
    /// Fee paid to the producer
    pub fee: u64,
    /// Submission timestamp, unix milliseconds
    pub timestamp: u64,
    /// Random value for guaranteed uniqueness
    pub salt: [u8; 16],
    /// Signature over the transaction (excluding this field)
    pub signature: Sig,
}

/// Transaction data for signing (excludes signature field)
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TransactionSigningData {
    chain_id: u64,
    from: PublicKey,
    to: PublicKey,
    amount: u64,
    fee: u64,
    timestamp: u64,
    salt: [u8; 16],
}

impl Transaction {
    /// Create a new unsigned transaction with a fresh random salt
    pub fn new(
        chain_id: u64,
        from: PublicKey,
        to: PublicKey,
        amount: u64,
        fee: u64,
        timestamp: u64,
    ) -> Self {
        let mut salt = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        Transaction {
            chain_id,
            from,
            to,
            amount,
            fee,
            timestamp,
            salt,
            signature: Sig::default(),
        }
    }

    fn signing_data(&self) -> TransactionSigningData {
        TransactionSigningData {
            chain_id: self.chain_id,
            from: self.from,
            to: self.to,
            amount: self.amount,
            fee: self.fee,
            timestamp: self.timestamp,
            salt: self.salt,
        }
    }

    pub fn signing_bytes(&self) -> Result<Vec<u8>, CoreError> {
        serialize::to_bytes(&self.signing_data())
    }

    /// Sign the transaction
    pub fn sign(&mut self, secret_key: &SecretKey) -> Result<(), CoreError> {
        let bytes = self.signing_bytes()?;
        self.signature = sign(secret_key, &bytes);
        Ok(())
    }

    /// Create a signed transaction
    pub fn new_signed(
        chain_id: u64,
        from: PublicKey,
        to: PublicKey,
        amount: u64,
        fee: u64,
        timestamp: u64,
        secret_key: &SecretKey,
    ) -> Result<Self, CoreError> {
        let mut tx = Self::new(chain_id, from, to, amount, fee, timestamp);
        tx.sign(secret_key)?;
        Ok(tx)
    }

    /// Verify the transaction signature
    pub fn verify_signature(&self) -> Result<(), CoreError> {
        let bytes = self.signing_bytes()?;
        verify(&self.from, &bytes, &self.signature)
    }

    /// Compute the transaction id hash (covers the signature)
    pub fn id(&self) -> Result<Hash, CoreError> {
        let bytes = serialize::to_bytes(self)?;
        Ok(hash_blake3(&bytes))
    }

    /// Arrival ordering key: timestamp first, salt as tie-break. Blocks must
    /// carry their transactions in this order.
    pub fn arrival_key(&self) -> (u64, [u8; 16]) {
        (self.timestamp, self.salt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    #[test]
    fn test_transaction_signing() {
        let sender = KeyPair::generate();
        let receiver = KeyPair::generate();

        let tx = Transaction::new_signed(
            1,
            sender.public,
            receiver.public,
            1000,
            10,
            1_700_000_000_000,
            &sender.secret,
        )
        .unwrap();

        assert!(tx.verify_signature().is_ok());
    }

    #[test]
    fn test_transaction_wrong_signer() {
        let sender = KeyPair::generate();
        let wrong_signer = KeyPair::generate();
        let receiver = KeyPair::generate();

        let tx = Transaction::new_signed(
            1,
            sender.public,
            receiver.public,
            1000,
            10,
            1_700_000_000_000,
            &wrong_signer.secret,
        )
        .unwrap();

        assert!(tx.verify_signature().is_err());
    }

    #[test]
    fn test_transaction_id_deterministic() {
        let sender = KeyPair::generate();
        let tx = Transaction::new_signed(
            1,
            sender.public,
            sender.public,
            500,
            5,
            1_700_000_000_000,
            &sender.secret,
        )
        .unwrap();

        assert_eq!(tx.id().unwrap(), tx.id().unwrap());
    }

    #[test]
    fn test_salt_uniqueness() {
        let sender = KeyPair::generate();
        let a = Transaction::new(1, sender.public, sender.public, 1, 1, 1000);
        let b = Transaction::new(1, sender.public, sender.public, 1, 1, 1000);
        assert_ne!(a.salt, b.salt);
    }

    #[test]
    fn test_arrival_key_orders_by_timestamp_then_salt() {
        let sender = KeyPair::generate();
        let mut early = Transaction::new(1, sender.public, sender.public, 1, 1, 1000);
        let mut late = Transaction::new(1, sender.public, sender.public, 1, 1, 2000);
        early.salt = [0xff; 16];
        late.salt = [0x00; 16];
        assert!(early.arrival_key() < late.arrival_key());
    }
}
