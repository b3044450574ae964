// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Kasalink error structs/enums, covering transport, protocol and device
//! level failures.

use displaydoc::Display;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type KasaResult<T = ()> = Result<T, KasaError>;

/// Connection errors occur while talking to a device on the wire. These are
/// transient by nature and the protocol layer retries them with backoff.
#[derive(Debug, Error, Display, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KasaConnectionError {
  /// Unable to reach {0}: {1}
  Unreachable(String, String),
  /// Connection to {0} was reset: {1}
  ConnectionReset(String, String),
  /// TLS failure while connecting to {0}: {1}
  TlsError(String, String),
  /// Request to {0} timed out after {1}s
  Timeout(String, u64),
  /// HTTP request to {0} failed with status {1}
  HttpStatus(String, u16),
}

impl KasaConnectionError {
  pub fn is_timeout(&self) -> bool {
    matches!(self, KasaConnectionError::Timeout(_, _))
  }
}

/// Authentication errors occur during handshake or login. These are not
/// retried, except for the single well-defined fallback to the default
/// credentials inside the KLAP handshake.
#[derive(Debug, Error, Display, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KasaAuthenticationError {
  /// Server hash mismatch during handshake with {0}
  HandshakeFailed(String),
  /// Login rejected by {0}: {1}
  LoginFailed(String, String),
  /// Device {0} requires authentication but no credentials were provided
  MissingCredentials(String),
}

/// Framing and serialization errors. A payload that cannot be decoded after a
/// successful exchange is a hard error, not a retry candidate.
#[derive(Debug, Error, Display, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KasaProtocolError {
  /// Unable to serialize request: {0}
  RequestSerialization(String),
  /// Unable to decode response from {0}: {1}
  ResponseDecode(String, String),
  /// Response from {0} is missing expected key {1}
  MissingKey(String, String),
  /// Payload framing error from {0}: {1}
  Framing(String, String),
}

/// Aggregation enum for all Kasalink error types.
#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
pub enum KasaError {
  #[error(transparent)]
  Connection(#[from] KasaConnectionError),
  #[error(transparent)]
  Authentication(#[from] KasaAuthenticationError),
  #[error(transparent)]
  Protocol(#[from] KasaProtocolError),
  /// Session cookie or token is no longer valid, a new handshake is needed.
  #[error("Device session expired")]
  InvalidSession,
  /// Device reported an error code for the whole request.
  #[error("Device {host} responded with error {code}")]
  Device { host: String, code: SmartErrorCode },
  /// Discovery or factory found something it cannot construct.
  #[error("Unsupported device: {0}")]
  UnsupportedDevice(String),
  /// The device id no longer exists on the parent device.
  #[error("Child device {0} not found on parent")]
  ChildDeviceGone(String),
  /// Accessor used before the first successful update.
  #[error("Call update() before accessing {0}")]
  NotNegotiated(String),
  /// Feature value rejected by validation.
  #[error("Invalid feature value for {id}: {reason}")]
  FeatureValue { id: String, reason: String },
  /// Bad or inconsistent device configuration.
  #[error("Invalid device configuration: {0}")]
  Config(String),
  /// Catch-all for internal invariant violations.
  #[error("{0}")]
  Message(String),
}

impl KasaError {
  /// Whether the protocol layer should retry the request with backoff.
  pub fn is_retryable(&self) -> bool {
    match self {
      KasaError::Connection(_) => true,
      KasaError::Device { code, .. } => code.is_retryable(),
      _ => false,
    }
  }

  pub fn json(context: &str, err: &serde_json::Error) -> Self {
    KasaProtocolError::ResponseDecode(context.to_owned(), err.to_string()).into()
  }
}

/// Error codes reported by SMART (Tapo and newer Kasa) firmware inside
/// response payloads. IOT devices use a different, smaller code space; their
/// raw `err_code` values are folded through [SmartErrorCode::from_code] and
/// surface as [SmartErrorCode::Unknown] when they have no SMART counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SmartErrorCode {
  Success,
  Unspecific,
  UnknownMethod,
  JsonDecodeFail,
  JsonEncodeFail,
  AesDecodeFail,
  RequestLenError,
  CloudFailed,
  ParamsError,
  InternalUnknown,
  SessionParam,
  QuickSetup,
  DeviceError,
  DeviceNextEvent,
  Firmware,
  FirmwareVer,
  Login,
  Time,
  TimeSys,
  TimeSave,
  Wireless,
  WirelessUnsupported,
  Schedule,
  ScheduleFull,
  ScheduleConflict,
  ScheduleSave,
  ScheduleIndex,
  Countdown,
  CountdownConflict,
  CountdownSave,
  Antitheft,
  AntitheftConflict,
  AntitheftSave,
  Account,
  Stat,
  StatSave,
  Dst,
  DstSave,
  DeviceNotFound,
  NullTransport,
  CommandCancel,
  TransportNotAvailable,
  UnknownCredentials,
  HandshakeFailed,
  LoginFailed,
  HttpTransportFailed,
  MultiRequestFailed,
  SessionTimeout,
  Unknown(i64),
}

impl SmartErrorCode {
  pub fn from_code(code: i64) -> Self {
    use SmartErrorCode::*;
    match code {
      0 => Success,
      -1001 => Unspecific,
      -1002 => UnknownMethod,
      -1003 => JsonDecodeFail,
      -1004 => JsonEncodeFail,
      -1005 => AesDecodeFail,
      -1006 => RequestLenError,
      -1007 => CloudFailed,
      -1008 => ParamsError,
      -1010 => InternalUnknown,
      -1101 => SessionParam,
      -1201 => QuickSetup,
      -1301 => DeviceError,
      -1302 => DeviceNextEvent,
      -1401 => Firmware,
      -1402 => FirmwareVer,
      -1501 => Login,
      -1601 => Time,
      -1602 => TimeSys,
      -1603 => TimeSave,
      -1701 => Wireless,
      -1702 => WirelessUnsupported,
      -1801 => Schedule,
      -1802 => ScheduleFull,
      -1803 => ScheduleConflict,
      -1804 => ScheduleSave,
      -1805 => ScheduleIndex,
      -1901 => Countdown,
      -1902 => CountdownConflict,
      -1903 => CountdownSave,
      -2001 => Antitheft,
      -2002 => AntitheftConflict,
      -2003 => AntitheftSave,
      -2101 => Account,
      -2201 => Stat,
      -2202 => StatSave,
      -2301 => Dst,
      -2302 => DstSave,
      -2600 => DeviceNotFound,
      1000 => NullTransport,
      1001 => CommandCancel,
      1002 => TransportNotAvailable,
      1003 => UnknownCredentials,
      1100 => HandshakeFailed,
      1111 => LoginFailed,
      1112 => HttpTransportFailed,
      1200 => MultiRequestFailed,
      9999 => SessionTimeout,
      other => Unknown(other),
    }
  }

  pub fn code(&self) -> i64 {
    use SmartErrorCode::*;
    match self {
      Success => 0,
      Unspecific => -1001,
      UnknownMethod => -1002,
      JsonDecodeFail => -1003,
      JsonEncodeFail => -1004,
      AesDecodeFail => -1005,
      RequestLenError => -1006,
      CloudFailed => -1007,
      ParamsError => -1008,
      InternalUnknown => -1010,
      SessionParam => -1101,
      QuickSetup => -1201,
      DeviceError => -1301,
      DeviceNextEvent => -1302,
      Firmware => -1401,
      FirmwareVer => -1402,
      Login => -1501,
      Time => -1601,
      TimeSys => -1602,
      TimeSave => -1603,
      Wireless => -1701,
      WirelessUnsupported => -1702,
      Schedule => -1801,
      ScheduleFull => -1802,
      ScheduleConflict => -1803,
      ScheduleSave => -1804,
      ScheduleIndex => -1805,
      Countdown => -1901,
      CountdownConflict => -1902,
      CountdownSave => -1903,
      Antitheft => -2001,
      AntitheftConflict => -2002,
      AntitheftSave => -2003,
      Account => -2101,
      Stat => -2201,
      StatSave => -2202,
      Dst => -2301,
      DstSave => -2302,
      DeviceNotFound => -2600,
      NullTransport => 1000,
      CommandCancel => 1001,
      TransportNotAvailable => 1002,
      UnknownCredentials => 1003,
      HandshakeFailed => 1100,
      LoginFailed => 1111,
      HttpTransportFailed => 1112,
      MultiRequestFailed => 1200,
      SessionTimeout => 9999,
      Unknown(code) => *code,
    }
  }

  /// Codes the protocol layer may retry within its backoff budget.
  pub fn is_retryable(&self) -> bool {
    matches!(
      self,
      SmartErrorCode::TransportNotAvailable
        | SmartErrorCode::HttpTransportFailed
        | SmartErrorCode::Unspecific
        | SmartErrorCode::SessionTimeout
    )
  }

  /// Codes that indicate bad or missing credentials.
  pub fn is_auth_error(&self) -> bool {
    matches!(
      self,
      SmartErrorCode::Login
        | SmartErrorCode::LoginFailed
        | SmartErrorCode::HandshakeFailed
        | SmartErrorCode::UnknownCredentials
        | SmartErrorCode::Account
    )
  }

  /// Session-invalidating codes that force a transport reset.
  pub fn is_session_error(&self) -> bool {
    matches!(
      self,
      SmartErrorCode::SessionTimeout | SmartErrorCode::SessionParam
    )
  }

  pub fn is_success(&self) -> bool {
    matches!(self, SmartErrorCode::Success)
  }
}

impl std::fmt::Display for SmartErrorCode {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{:?}({})", self, self.code())
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use test_case::test_case;

  #[test_case(-1008, SmartErrorCode::ParamsError ; "params error")]
  #[test_case(9999, SmartErrorCode::SessionTimeout ; "session timeout")]
  #[test_case(0, SmartErrorCode::Success ; "success")]
  #[test_case(-31337, SmartErrorCode::Unknown(-31337) ; "unknown code")]
  fn error_code_round_trip(code: i64, expected: SmartErrorCode) {
    let parsed = SmartErrorCode::from_code(code);
    assert_eq!(parsed, expected);
    assert_eq!(parsed.code(), code);
  }

  #[test]
  fn retry_classification() {
    assert!(KasaError::from(KasaConnectionError::Timeout("1.2.3.4".to_owned(), 5)).is_retryable());
    assert!(!KasaError::InvalidSession.is_retryable());
    assert!(
      !KasaError::from(KasaAuthenticationError::HandshakeFailed("1.2.3.4".to_owned()))
        .is_retryable()
    );
    assert!(SmartErrorCode::SessionTimeout.is_session_error());
    assert!(!SmartErrorCode::ParamsError.is_retryable());
  }
}
