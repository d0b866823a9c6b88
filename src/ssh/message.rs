//! Wire codec for the SSH user-authentication messages.
//!
//! Only the handful of messages the password exchange needs are modelled:
//! service request/accept and the `SSH_MSG_USERAUTH_*` family. Payloads are
//! the unencrypted message bodies handed to and received from the transport.

use crate::error::{CheckError, CheckResult};
use std::fmt;

pub const SSH_MSG_IGNORE: u8 = 2;
pub const SSH_MSG_SERVICE_REQUEST: u8 = 5;
pub const SSH_MSG_SERVICE_ACCEPT: u8 = 6;
pub const SSH_MSG_USERAUTH_REQUEST: u8 = 50;
pub const SSH_MSG_USERAUTH_FAILURE: u8 = 51;
pub const SSH_MSG_USERAUTH_SUCCESS: u8 = 52;
pub const SSH_MSG_USERAUTH_BANNER: u8 = 53;

/// Service requested before any user authentication.
pub const SERVICE_USERAUTH: &str = "ssh-userauth";
/// Service started once authentication succeeds.
pub const SERVICE_CONNECTION: &str = "ssh-connection";

/// Method carried by a `SSH_MSG_USERAUTH_REQUEST`.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthMethod {
    /// Probe that asks the server which methods it accepts.
    None,
    Password { password: String },
}

impl AuthMethod {
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Password { .. } => "password",
        }
    }
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded authentication-layer message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMessage {
    ServiceRequest {
        service: String,
    },
    ServiceAccept {
        service: String,
    },
    UserauthRequest {
        user: String,
        service: String,
        method: AuthMethod,
    },
    UserauthFailure {
        methods: Vec<String>,
        partial_success: bool,
    },
    UserauthSuccess,
    UserauthBanner {
        message: String,
        language: String,
    },
}

impl AuthMessage {
    pub fn service_request(service: &str) -> Self {
        Self::ServiceRequest {
            service: service.to_string(),
        }
    }

    pub fn none_request(user: &str) -> Self {
        Self::UserauthRequest {
            user: user.to_string(),
            service: SERVICE_CONNECTION.to_string(),
            method: AuthMethod::None,
        }
    }

    pub fn password_request(user: &str, password: &str) -> Self {
        Self::UserauthRequest {
            user: user.to_string(),
            service: SERVICE_CONNECTION.to_string(),
            method: AuthMethod::Password {
                password: password.to_string(),
            },
        }
    }

    /// The SSH message number of this message.
    pub fn message_type(&self) -> u8 {
        match self {
            Self::ServiceRequest { .. } => SSH_MSG_SERVICE_REQUEST,
            Self::ServiceAccept { .. } => SSH_MSG_SERVICE_ACCEPT,
            Self::UserauthRequest { .. } => SSH_MSG_USERAUTH_REQUEST,
            Self::UserauthFailure { .. } => SSH_MSG_USERAUTH_FAILURE,
            Self::UserauthSuccess => SSH_MSG_USERAUTH_SUCCESS,
            Self::UserauthBanner { .. } => SSH_MSG_USERAUTH_BANNER,
        }
    }

    /// Encode into a message payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![self.message_type()];
        match self {
            Self::ServiceRequest { service } | Self::ServiceAccept { service } => {
                put_string(&mut buf, service.as_bytes());
            }
            Self::UserauthRequest {
                user,
                service,
                method,
            } => {
                put_string(&mut buf, user.as_bytes());
                put_string(&mut buf, service.as_bytes());
                put_string(&mut buf, method.name().as_bytes());
                if let AuthMethod::Password { password } = method {
                    buf.push(0);
                    put_string(&mut buf, password.as_bytes());
                }
            }
            Self::UserauthFailure {
                methods,
                partial_success,
            } => {
                put_string(&mut buf, methods.join(",").as_bytes());
                buf.push(u8::from(*partial_success));
            }
            Self::UserauthSuccess => {}
            Self::UserauthBanner { message, language } => {
                put_string(&mut buf, message.as_bytes());
                put_string(&mut buf, language.as_bytes());
            }
        }
        buf
    }

    /// Decode a message payload.
    pub fn decode(payload: &[u8]) -> CheckResult<Self> {
        let mut reader = Reader::new(payload);
        let msg_type = reader.byte()?;

        let msg = match msg_type {
            SSH_MSG_SERVICE_REQUEST => Self::ServiceRequest {
                service: reader.utf8()?,
            },
            SSH_MSG_SERVICE_ACCEPT => Self::ServiceAccept {
                service: reader.utf8()?,
            },
            SSH_MSG_USERAUTH_REQUEST => {
                let user = reader.utf8()?;
                let service = reader.utf8()?;
                let method = match reader.utf8()?.as_str() {
                    "none" => AuthMethod::None,
                    "password" => {
                        if reader.boolean()? {
                            return Err(CheckError::Protocol(
                                "password change requests are not supported".to_string(),
                            ));
                        }
                        AuthMethod::Password {
                            password: reader.utf8()?,
                        }
                    }
                    other => {
                        return Err(CheckError::Protocol(format!(
                            "unsupported authentication method {other}"
                        )))
                    }
                };
                Self::UserauthRequest {
                    user,
                    service,
                    method,
                }
            }
            SSH_MSG_USERAUTH_FAILURE => {
                let list = reader.utf8()?;
                Self::UserauthFailure {
                    methods: split_name_list(&list),
                    partial_success: reader.boolean()?,
                }
            }
            SSH_MSG_USERAUTH_SUCCESS => Self::UserauthSuccess,
            SSH_MSG_USERAUTH_BANNER => Self::UserauthBanner {
                message: reader.utf8()?,
                language: reader.utf8().unwrap_or_default(),
            },
            other => {
                return Err(CheckError::Protocol(format!(
                    "unexpected SSH message (type {other})"
                )))
            }
        };
        Ok(msg)
    }
}

/// The message number of a raw payload, if it has one.
pub fn peek_type(payload: &[u8]) -> Option<u8> {
    payload.first().copied()
}

fn split_name_list(list: &str) -> Vec<String> {
    list.split(',')
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

fn put_string(buf: &mut Vec<u8>, data: &[u8]) {
    let len = u32::try_from(data.len()).unwrap_or(u32::MAX);
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(data);
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> CheckResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| CheckError::Protocol("truncated SSH message".to_string()))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn byte(&mut self) -> CheckResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn boolean(&mut self) -> CheckResult<bool> {
        Ok(self.byte()? != 0)
    }

    fn u32(&mut self) -> CheckResult<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn utf8(&mut self) -> CheckResult<String> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| CheckError::Protocol("invalid UTF-8 in SSH string".to_string()))
    }
}
