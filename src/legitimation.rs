//! Legitimation (password authentication) of a server session.
//!
//! Devices above full access require a legitimation before write access is
//! granted. Which flow applies depends on device family and firmware, both
//! parsed from the session version string:
//!
//! | family | supported from | legacy flow below |
//! |--------|----------------|-------------------|
//! | 5xx    | V2.9           | V3.1              |
//! | 2xx    | V4.3           | V4.7              |
//!
//! The legacy flow answers the challenge with `SHA1(password) XOR challenge`.
//! The modern flow encrypts a payload struct with AES-256-CBC, keyed from TLS
//! exported keying material and using the challenge as IV.

use std::fmt;

use aes::cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit};
use sha1::{Digest, Sha1};
use sha2::Sha256;
use tracing::{debug, warn};

use crate::client::S7Client;
use crate::error::{Result, S7Error};
use crate::pdu::{Response, SetVariableRequest};
use crate::transport::Transport;
use crate::types::{ids, Blob, Value, ValueStruct};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

/// Highest protection level that grants full access.
pub const FULL_ACCESS: u32 = 1;

/// Label of the TLS exported keying material.
pub const EKM_LABEL: &str = "EXPERIMENTAL_OMS";

const EKM_LEN: usize = 32;
const IV_LEN: usize = 16;

const LOGIN_TYPE_PASSWORD: u32 = 1;
const LOGIN_TYPE_USER: u32 = 2;

/// Legitimation flow selected by firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegitimationMode {
    /// SHA1 XOR challenge
    Legacy,
    /// AES-256-CBC encrypted payload
    Modern,
}

/// Device family and firmware parsed from a session version string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceVersion {
    /// Three-digit family number, e.g. 515 for an S7-1515.
    pub family: u16,
    /// Firmware as `major * 100 + minor`.
    pub firmware: u16,
}

impl DeviceVersion {
    /// Parse a version string such as `1;6ES7 515-2AM01-0AB0 ;V2.9`.
    pub fn parse(version: &str) -> Result<Self> {
        let unsupported = || S7Error::FirmwareNotSupported(version.to_string());
        let family = parse_family(version).ok_or_else(unsupported)?;
        let firmware = parse_firmware(version).ok_or_else(unsupported)?;
        Ok(Self { family, firmware })
    }

    /// Flow to use for this device.
    pub fn mode(&self) -> Result<LegitimationMode> {
        let (min_supported, modern_from) = match self.family / 100 {
            5 => (209, 301),
            2 => (403, 407),
            _ => return Err(S7Error::FirmwareNotSupported(self.to_string())),
        };
        if self.firmware < min_supported {
            Err(S7Error::FirmwareNotSupported(self.to_string()))
        } else if self.firmware < modern_from {
            Ok(LegitimationMode::Legacy)
        } else {
            Ok(LegitimationMode::Modern)
        }
    }
}

impl fmt::Display for DeviceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}xx V{}.{}",
            self.family / 100,
            self.firmware / 100,
            self.firmware % 100
        )
    }
}

// Last match of `[17]\s?\d{3}`; the order number reads "6ES7 515-...".
fn parse_family(version: &str) -> Option<u16> {
    let bytes = version.as_bytes();
    let mut family = None;
    for (i, &b) in bytes.iter().enumerate() {
        if b != b'1' && b != b'7' {
            continue;
        }
        let mut start = i + 1;
        if bytes.get(start).is_some_and(u8::is_ascii_whitespace) {
            start += 1;
        }
        if let Some(digits) = bytes.get(start..start + 3) {
            if digits.iter().all(u8::is_ascii_digit) {
                family = digits
                    .iter()
                    .try_fold(0u16, |acc, d| Some(acc * 10 + u16::from(d - b'0')));
            }
        }
    }
    family
}

// Last "V<major>.<minor>"
fn parse_firmware(version: &str) -> Option<u16> {
    let start = version.rfind('V')?;
    let (major, minor) = version[start + 1..].split_once('.')?;
    let minor: String = minor.chars().take_while(char::is_ascii_digit).collect();
    let major: u16 = major.parse().ok()?;
    let minor: u16 = minor.parse().ok()?;
    if minor > 99 {
        return None;
    }
    major.checked_mul(100)?.checked_add(minor)
}

/// Legacy challenge response: `SHA1(password) XOR challenge`.
pub fn legacy_response(password: &str, challenge: &[u8]) -> Result<Vec<u8>> {
    let digest = Sha1::digest(password.as_bytes());
    if challenge.len() != digest.len() {
        return Err(S7Error::protocol(format!(
            "challenge has {} bytes, expected {}",
            challenge.len(),
            digest.len()
        )));
    }
    Ok(digest.iter().zip(challenge).map(|(d, c)| d ^ c).collect())
}

/// AES key from exported keying material.
pub fn derive_key(keying_material: &[u8]) -> [u8; 32] {
    let key = Sha256::digest(keying_material);
    Sha256::digest(key).into()
}

/// Payload struct of the modern flow.
pub fn legitimation_payload(username: Option<&str>, password: &str) -> Value {
    let (login_type, username, password) = match username {
        Some(user) => (LOGIN_TYPE_USER, user.as_bytes().to_vec(), password.as_bytes().to_vec()),
        None => (LOGIN_TYPE_PASSWORD, Vec::new(), Sha1::digest(password.as_bytes()).to_vec()),
    };
    Value::Struct(
        ValueStruct::new(ids::LEGITIMATION_PAYLOAD_STRUCT)
            .with(ids::LEGITIMATION_PAYLOAD_TYPE, Value::UDInt(login_type))
            .with(ids::LEGITIMATION_PAYLOAD_USERNAME, Value::Blob(Blob::new(username)))
            .with(ids::LEGITIMATION_PAYLOAD_PASSWORD, Value::Blob(Blob::new(password))),
    )
}

/// Encrypt the serialized payload with AES-256-CBC/PKCS7.
pub fn encrypt_payload(payload: &Value, key: &[u8; 32], challenge: &[u8]) -> Result<Vec<u8>> {
    let iv = challenge
        .get(..IV_LEN)
        .ok_or_else(|| {
            S7Error::protocol(format!("challenge too short: {} bytes", challenge.len()))
        })?;
    let cipher = Aes256CbcEnc::new_from_slices(key, iv)
        .map_err(|e| S7Error::protocol(format!("cipher setup failed: {e}")))?;
    Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(&payload.to_bytes()))
}

/// Read the protection level and legitimate if required.
///
/// Without a configured password the session stays read-only.
pub(crate) async fn legitimate<T: Transport>(client: &mut S7Client<T>) -> Result<()> {
    let session_id = client.session().session_id();
    let level = client
        .get_var_substreamed(session_id, ids::EFFECTIVE_PROTECTION_LEVEL)
        .await?
        .as_u32()
        .ok_or_else(|| S7Error::protocol("protection level is not an unsigned integer"))?;
    client.session_mut().protection_level = Some(level);
    debug!(level, "effective protection level");

    if level <= FULL_ACCESS {
        return Ok(());
    }
    let Some(password) = client.config().password.clone() else {
        warn!(level, "device is protected and no password is configured, session is read-only");
        return Ok(());
    };

    let version = client
        .session()
        .version_string()
        .ok_or_else(|| S7Error::FirmwareNotSupported("no version string".into()))?;
    let device = DeviceVersion::parse(version)?;
    let mode = device.mode()?;
    debug!(%device, ?mode, "legitimating");

    let challenge = client
        .get_var_substreamed(session_id, ids::SERVER_SESSION_REQUEST)
        .await?
        .as_byte_array()
        .ok_or_else(|| S7Error::protocol("challenge is not a byte array"))?;

    let request = match mode {
        LegitimationMode::Legacy => {
            let response = legacy_response(&password, &challenge)?;
            SetVariableRequest::new(
                session_id,
                ids::SERVER_SESSION_RESPONSE,
                Value::usint_array(&response),
            )
        }
        LegitimationMode::Modern => {
            let keying_material = client.transport().export_keying_material(EKM_LABEL, EKM_LEN)?;
            let key = derive_key(&keying_material);
            let payload = legitimation_payload(client.config().username.as_deref(), &password);
            let encrypted = encrypt_payload(&payload, &key, &challenge)?;
            SetVariableRequest::new(session_id, ids::LEGITIMATE, Value::Blob(Blob::new(encrypted)))
        }
    };

    let response = client.request(&request).await?;
    let return_value = response.return_value() as i64;
    if return_value < 0 {
        return Err(S7Error::AccessDenied(return_value));
    }
    client.session_mut().legitimated = true;
    debug!("legitimation accepted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientConfig, ConnectionState};
    use crate::pdu::{FunctionCode, SetVariableResponse};
    use crate::transport::mock::{device_transport, MockDevice, MockTransport};
    use aes::cipher::BlockDecryptMut;

    type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

    fn protected_device(version: &str) -> MockDevice {
        MockDevice {
            version_string: version.into(),
            protection_level: 3,
            ..Default::default()
        }
    }

    fn accepting(device: MockDevice, return_value: u64) -> MockTransport {
        device_transport(device, move |request| match request.header.function_code {
            FunctionCode::SetVariable => vec![request.reply(&SetVariableResponse { return_value })],
            _ => vec![],
        })
    }

    fn written(client: &S7Client<MockTransport>) -> (u32, Value) {
        let request = client
            .transport()
            .requests
            .iter()
            .find(|r| r.header.function_code == FunctionCode::SetVariable)
            .unwrap();
        (request.variable_address().unwrap(), request.written_value().unwrap())
    }

    fn mode(version: &str) -> Result<LegitimationMode> {
        DeviceVersion::parse(version)?.mode()
    }

    #[test]
    fn test_parse_version_string() {
        let device = DeviceVersion::parse("1;6ES7 515-2AM01-0AB0 ;V2.9").unwrap();
        assert_eq!(device.family, 515);
        assert_eq!(device.firmware, 209);
        assert_eq!(device.to_string(), "5xx V2.9");

        let device = DeviceVersion::parse("1;6ES7214-1AG40-0XB0 ;V4.5").unwrap();
        assert_eq!(device.family, 214);
        assert_eq!(device.firmware, 405);

        assert!(matches!(
            DeviceVersion::parse("garbage"),
            Err(S7Error::FirmwareNotSupported(_))
        ));
        assert!(DeviceVersion::parse("1;6ES7 515-2AM01-0AB0").is_err());
    }

    #[test]
    fn test_mode_gating_boundaries() {
        let s1500 = "1;6ES7 515-2AM01-0AB0 ;";
        assert!(mode(&format!("{s1500}V2.8")).is_err());
        assert_eq!(mode(&format!("{s1500}V2.9")).unwrap(), LegitimationMode::Legacy);
        assert_eq!(mode(&format!("{s1500}V3.0")).unwrap(), LegitimationMode::Legacy);
        assert_eq!(mode(&format!("{s1500}V3.1")).unwrap(), LegitimationMode::Modern);

        let s1200 = "1;6ES7 214-1AG40-0XB0 ;";
        assert!(mode(&format!("{s1200}V4.2")).is_err());
        assert_eq!(mode(&format!("{s1200}V4.3")).unwrap(), LegitimationMode::Legacy);
        assert_eq!(mode(&format!("{s1200}V4.6")).unwrap(), LegitimationMode::Legacy);
        assert_eq!(mode(&format!("{s1200}V4.7")).unwrap(), LegitimationMode::Modern);

        assert!(matches!(
            mode("1;6ES7 315-2EH14-0AB0 ;V3.3"),
            Err(S7Error::FirmwareNotSupported(_))
        ));
    }

    #[test]
    fn test_legacy_response() {
        let challenge: Vec<u8> = (0u8..20).collect();
        let response = legacy_response("secret", &challenge).unwrap();
        let digest = Sha1::digest(b"secret");
        let recovered: Vec<u8> = response.iter().zip(&challenge).map(|(r, c)| r ^ c).collect();
        assert_eq!(recovered, digest.to_vec());

        assert!(matches!(
            legacy_response("secret", &challenge[..16]),
            Err(S7Error::Protocol(_))
        ));
    }

    #[test]
    fn test_derive_key_rehashes() {
        let material = [7u8; 32];
        let once = Sha256::digest(material);
        assert_ne!(derive_key(&material).as_slice(), once.as_slice());
        assert_eq!(derive_key(&material).as_slice(), Sha256::digest(once).as_slice());
    }

    #[test]
    fn test_payload_login_types() {
        let payload = legitimation_payload(None, "pw");
        let fields = payload.as_struct().unwrap();
        assert_eq!(fields.get(ids::LEGITIMATION_PAYLOAD_TYPE), Some(&Value::UDInt(1)));
        assert_eq!(
            fields.get(ids::LEGITIMATION_PAYLOAD_PASSWORD),
            Some(&Value::Blob(Blob::new(Sha1::digest(b"pw").to_vec())))
        );

        let payload = legitimation_payload(Some("operator"), "pw");
        let fields = payload.as_struct().unwrap();
        assert_eq!(fields.get(ids::LEGITIMATION_PAYLOAD_TYPE), Some(&Value::UDInt(2)));
        assert_eq!(
            fields.get(ids::LEGITIMATION_PAYLOAD_USERNAME),
            Some(&Value::Blob(Blob::new(b"operator".to_vec())))
        );
    }

    #[tokio::test]
    async fn test_legacy_legitimation() {
        let device = protected_device("1;6ES7 515-2AM01-0AB0 ;V2.9");
        let challenge = device.challenge.clone();
        let config = ClientConfig::new("mock:102").password("secret");
        let mut client = S7Client::new(config, accepting(device, 0));

        client.connect().await.unwrap();
        assert_eq!(client.state(), ConnectionState::Ready);
        assert!(client.session().is_legitimated());
        assert_eq!(client.session().protection_level(), Some(3));

        let (address, value) = written(&client);
        assert_eq!(address, ids::SERVER_SESSION_RESPONSE);
        let expected = legacy_response("secret", &challenge).unwrap();
        assert_eq!(value, Value::usint_array(&expected));
    }

    #[tokio::test]
    async fn test_modern_legitimation() {
        let device = protected_device("1;6ES7 515-2AM01-0AB0 ;V3.1");
        let challenge = device.challenge.clone();
        let config = ClientConfig::new("mock:102").username("operator").password("secret");
        let mut client = S7Client::new(config, accepting(device, 0));

        client.connect().await.unwrap();
        assert!(client.session().is_legitimated());

        let (address, value) = written(&client);
        assert_eq!(address, ids::LEGITIMATE);
        let Value::Blob(blob) = value else {
            panic!("expected blob");
        };
        let key = derive_key(&client.transport().keying_material);
        let plain = Aes256CbcDec::new_from_slices(&key, &challenge[..16])
            .unwrap()
            .decrypt_padded_vec_mut::<Pkcs7>(&blob.data)
            .unwrap();
        let payload = Value::decode(&mut &plain[..]).unwrap();
        assert_eq!(payload, legitimation_payload(Some("operator"), "secret"));
    }

    #[tokio::test]
    async fn test_access_denied() {
        let device = protected_device("1;6ES7 515-2AM01-0AB0 ;V2.9");
        let config = ClientConfig::new("mock:102").password("wrong");
        let mut client = S7Client::new(config, accepting(device, (-1i64) as u64));

        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, S7Error::AccessDenied(-1)));
        assert_eq!(err.kind(), crate::error::ErrorKind::Auth);
        assert_eq!(client.state(), ConnectionState::Faulted);
        assert!(client.transport().closed);
    }

    #[tokio::test]
    async fn test_unsupported_firmware_with_password() {
        let device = protected_device("1;6ES7 515-2AM01-0AB0 ;V2.8");
        let config = ClientConfig::new("mock:102").password("secret");
        let mut client = S7Client::new(config, accepting(device, 0));

        assert!(matches!(
            client.connect().await,
            Err(S7Error::FirmwareNotSupported(_))
        ));
    }

    #[tokio::test]
    async fn test_protected_without_password_is_read_only() {
        let device = protected_device("1;6ES7 515-2AM01-0AB0 ;V2.8");
        let mut client = S7Client::new(ClientConfig::new("mock:102"), accepting(device, 0));

        client.connect().await.unwrap();
        assert_eq!(client.state(), ConnectionState::Ready);
        assert!(!client.session().is_legitimated());
        assert_eq!(client.transport().count(FunctionCode::SetVariable), 0);
        assert_eq!(client.transport().count(FunctionCode::GetVarSubStreamed), 1);
    }
}
