//! PayTR HMAC token protocol
//!
//! Every gateway-facing token is `base64(HMAC_SHA256(key = merchant_key, message))`.
//! The message layout differs per purpose and must match the gateway byte for
//! byte:
//!
//! | purpose      | message                                                     |
//! |--------------|-------------------------------------------------------------|
//! | init         | merchant_id user_ip merchant_oid email amount payment_type installment_count currency test_mode non_3d **salt** |
//! | callback     | merchant_oid **salt** status total_amount                   |
//! | status query | merchant_oid **salt**                                       |
//! | refund       | merchant_oid amount **salt**                                |
//!
//! Amounts are always integer minor units.

use crate::error::{AppError, AppResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Convert a major-unit amount to integer minor units, rounding half away from zero.
pub fn to_minor_units(amount: Decimal) -> AppResult<i64> {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| AppError::validation("amount", format!("{} is out of range", amount)))
}

pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}

/// Constant-time byte comparison
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Fields of the initialisation token, in gateway order
#[derive(Debug, Clone)]
pub struct InitTokenFields<'a> {
    pub merchant_id: &'a str,
    pub user_ip: &'a str,
    pub merchant_oid: &'a str,
    pub email: &'a str,
    pub amount_minor: i64,
    pub payment_type: &'a str,
    pub installment_count: i32,
    pub currency: &'a str,
    pub test_mode: bool,
    pub non_3d: bool,
}

/// Token signer bound to one tenant's secret key and salt
pub struct HashProtocol<'a> {
    key: &'a str,
    salt: &'a str,
}

impl<'a> HashProtocol<'a> {
    pub fn new(key: &'a str, salt: &'a str) -> Self {
        Self { key, salt }
    }

    /// `base64(HMAC(key, concat(fields) + salt))`
    pub fn sign(&self, fields: &[&str]) -> String {
        let mut mac = self.mac();
        for field in fields {
            mac.update(field.as_bytes());
        }
        mac.update(self.salt.as_bytes());
        STANDARD.encode(mac.finalize().into_bytes())
    }

    /// Check `token` against `sign(fields)` in constant time
    pub fn verify(&self, fields: &[&str], token: &str) -> bool {
        let expected = self.sign(fields);
        constant_time_eq(expected.as_bytes(), token.trim().as_bytes())
    }

    pub fn init_token(&self, fields: &InitTokenFields<'_>) -> String {
        let amount = fields.amount_minor.to_string();
        let installments = fields.installment_count.to_string();
        self.sign(&[
            fields.merchant_id,
            fields.user_ip,
            fields.merchant_oid,
            fields.email,
            &amount,
            fields.payment_type,
            &installments,
            fields.currency,
            flag(fields.test_mode),
            flag(fields.non_3d),
        ])
    }

    /// Hash the gateway attaches to callbacks. The salt sits between
    /// `merchant_oid` and `status` and is not appended at the end.
    pub fn callback_hash(&self, merchant_oid: &str, status: &str, total_amount: &str) -> String {
        let mut mac = self.mac();
        mac.update(merchant_oid.as_bytes());
        mac.update(self.salt.as_bytes());
        mac.update(status.as_bytes());
        mac.update(total_amount.as_bytes());
        STANDARD.encode(mac.finalize().into_bytes())
    }

    pub fn verify_callback(
        &self,
        merchant_oid: &str,
        status: &str,
        total_amount: &str,
        hash: &str,
    ) -> bool {
        let expected = self.callback_hash(merchant_oid, status, total_amount);
        constant_time_eq(expected.as_bytes(), hash.as_bytes())
    }

    pub fn status_query_token(&self, merchant_oid: &str) -> String {
        self.sign(&[merchant_oid])
    }

    pub fn refund_token(&self, merchant_oid: &str, amount_minor: i64) -> String {
        self.sign(&[merchant_oid, &amount_minor.to_string()])
    }

    fn mac(&self) -> HmacSha256 {
        <HmacSha256 as Mac>::new_from_slice(self.key.as_bytes())
            .expect("HMAC can take key of any size")
    }
}

fn flag(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}
