//! Endpoint specifications.
//!
//! An endpoint is written `scheme:rest`: `tcp:host:port`, `ssl:host:port`,
//! or `unix:/path/to/socket`. The port defaults to 6640 when omitted.
//! Bracketed IPv6 literals are accepted in the host position.

use crate::error::{ClientError, ClientResult};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// The port used when a tcp or ssl endpoint omits one.
pub const DEFAULT_PORT: u16 = 6640;

/// One way to reach a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Plain TCP.
    Tcp {
        /// Host name or address.
        host: String,
        /// TCP port.
        port: u16,
    },
    /// TLS over TCP; requires a connector in the options.
    Ssl {
        /// Host name or address, also used for certificate verification.
        host: String,
        /// TCP port.
        port: u16,
    },
    /// A unix domain socket.
    Unix {
        /// Socket path.
        path: PathBuf,
    },
}

impl Endpoint {
    /// Parses an endpoint specification.
    pub fn parse(spec: &str) -> ClientResult<Self> {
        let bad = |reason: &str| ClientError::BadEndpoint {
            spec: spec.to_string(),
            reason: reason.to_string(),
        };
        let (scheme, rest) = spec.split_once(':').ok_or_else(|| bad("missing scheme"))?;
        match scheme {
            "unix" => {
                if rest.is_empty() {
                    return Err(bad("empty socket path"));
                }
                Ok(Endpoint::Unix {
                    path: PathBuf::from(rest),
                })
            }
            "tcp" | "ssl" => {
                let (host, port) = split_host_port(rest).ok_or_else(|| bad("empty host"))?;
                let port = match port {
                    Some(text) => text.parse().map_err(|_| bad("bad port"))?,
                    None => DEFAULT_PORT,
                };
                if scheme == "tcp" {
                    Ok(Endpoint::Tcp { host, port })
                } else {
                    Ok(Endpoint::Ssl { host, port })
                }
            }
            _ => Err(bad("unknown scheme")),
        }
    }

    /// The `host:port` address for tcp and ssl endpoints.
    pub(crate) fn address(&self) -> Option<String> {
        match self {
            Endpoint::Tcp { host, port } | Endpoint::Ssl { host, port } => {
                if host.contains(':') {
                    Some(format!("[{host}]:{port}"))
                } else {
                    Some(format!("{host}:{port}"))
                }
            }
            Endpoint::Unix { .. } => None,
        }
    }
}

/// Splits `host[:port]`, handling `[v6]:port` brackets.
fn split_host_port(rest: &str) -> Option<(String, Option<&str>)> {
    if rest.is_empty() {
        return None;
    }
    if let Some(inner) = rest.strip_prefix('[') {
        let (host, tail) = inner.split_once(']')?;
        if host.is_empty() {
            return None;
        }
        let port = match tail.strip_prefix(':') {
            Some(p) if !p.is_empty() => Some(p),
            Some(_) => return None,
            None if tail.is_empty() => None,
            None => return None,
        };
        return Some((host.to_string(), port));
    }
    match rest.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && !host.contains(':') && !port.is_empty() => {
            Some((host.to_string(), Some(port)))
        }
        Some(_) => None,
        None => Some((rest.to_string(), None)),
    }
}

impl FromStr for Endpoint {
    type Err = ClientError;

    fn from_str(s: &str) -> ClientResult<Self> {
        Endpoint::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port } => write!(f, "tcp:{host}:{port}"),
            Endpoint::Ssl { host, port } => write!(f, "ssl:{host}:{port}"),
            Endpoint::Unix { path } => write!(f, "unix:{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tcp_with_port() {
        let ep = Endpoint::parse("tcp:198.51.100.7:6641").unwrap();
        assert_eq!(
            ep,
            Endpoint::Tcp {
                host: "198.51.100.7".into(),
                port: 6641
            }
        );
        assert_eq!(ep.address().unwrap(), "198.51.100.7:6641");
    }

    #[test]
    fn tcp_defaults_the_port() {
        let ep = Endpoint::parse("tcp:db.example.org").unwrap();
        assert_eq!(
            ep,
            Endpoint::Tcp {
                host: "db.example.org".into(),
                port: DEFAULT_PORT
            }
        );
    }

    #[test]
    fn ipv6_hosts_use_brackets() {
        let ep = Endpoint::parse("ssl:[2001:db8::1]:16640").unwrap();
        assert_eq!(
            ep,
            Endpoint::Ssl {
                host: "2001:db8::1".into(),
                port: 16640
            }
        );
        assert_eq!(ep.address().unwrap(), "[2001:db8::1]:16640");

        let ep = Endpoint::parse("tcp:[2001:db8::1]").unwrap();
        assert_eq!(
            ep,
            Endpoint::Tcp {
                host: "2001:db8::1".into(),
                port: DEFAULT_PORT
            }
        );
    }

    #[test]
    fn unix_path() {
        let ep = Endpoint::parse("unix:/var/run/switchdb/db.sock").unwrap();
        assert_eq!(
            ep,
            Endpoint::Unix {
                path: "/var/run/switchdb/db.sock".into()
            }
        );
        assert!(ep.address().is_none());
    }

    #[test]
    fn malformed_specs_are_rejected() {
        for spec in [
            "",
            "tcp",
            "tcp:",
            "tcp::6640",
            "tcp:host:badport",
            "tcp:[::1",
            "unix:",
            "http:host:80",
        ] {
            assert!(
                matches!(Endpoint::parse(spec), Err(ClientError::BadEndpoint { .. })),
                "{spec:?} should not parse"
            );
        }
    }

    #[test]
    fn display_round_trips() {
        for spec in ["tcp:h:6640", "ssl:h:6641", "unix:/tmp/x.sock"] {
            assert_eq!(Endpoint::parse(spec).unwrap().to_string(), spec);
        }
    }
}
