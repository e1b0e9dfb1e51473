//! Hash functions returning lowercase hex digests.

use super::str_arg;
use crate::error::Result;
use crate::value::Value;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use std::fmt::Write as _;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HashFunc {
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl HashFunc {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "sha224" => Self::Sha224,
            "sha256" => Self::Sha256,
            "sha384" => Self::Sha384,
            "sha512" => Self::Sha512,
            _ => return None,
        })
    }

    pub fn call(self, args: &[Value]) -> Result<Value> {
        let input = str_arg("hash", args, 0)?.as_bytes();
        let digest = match self {
            Self::Sha224 => Sha224::digest(input).to_vec(),
            Self::Sha256 => Sha256::digest(input).to_vec(),
            Self::Sha384 => Sha384::digest(input).to_vec(),
            Self::Sha512 => Sha512::digest(input).to_vec(),
        };
        Ok(Value::String(hex(&digest)))
    }
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}
