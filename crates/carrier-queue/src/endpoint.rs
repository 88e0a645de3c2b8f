//! Endpoint addressing: queue locations identified by URI.
//!
//! An endpoint URI has the form
//! `<scheme>://<host>:<port>/<queueName>[;subqueue=<sub>]` where the scheme
//! selects the queue engine, host and port locate the peer, and the path
//! names the queue. The port defaults to 2200 when unspecified.

use crate::error::ValidationError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Default listen port when the URI carries none
pub const DEFAULT_PORT: u16 = 2200;

/// Reserved URI suffix that addresses a sub-queue
const SUBQUEUE_SUFFIX: &str = ";subqueue=";

// ============================================================================
// QueueName
// ============================================================================

/// Validated queue name that follows engine naming conventions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueName(String);

impl QueueName {
    /// Create new queue name with validation
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();

        if name.is_empty() || name.len() > 260 {
            return Err(ValidationError::OutOfRange {
                field: "queue_name".to_string(),
                message: "must be 1-260 characters".to_string(),
            });
        }

        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "only ASCII alphanumeric, hyphens, underscores, and dots allowed"
                    .to_string(),
            });
        }

        if name.starts_with('-') || name.ends_with('-') || name.contains("--") {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "no leading/trailing hyphens or consecutive hyphens".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

// ============================================================================
// SubQueue
// ============================================================================

/// Named sub-queues of a durable queue.
///
/// Moving a message between the main queue and a sub-queue is a
/// transactional operation on the queue engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubQueue {
    /// Future-dated messages parked until their send-time elapses
    Timeout,
    /// Messages no subscriber consumed, retained for audit
    Discarded,
    /// Poison messages quarantined after exhausting retries
    Errors,
}

impl SubQueue {
    /// All sub-queues created at transport start-up
    pub const ALL: [SubQueue; 3] = [SubQueue::Timeout, SubQueue::Discarded, SubQueue::Errors];

    /// Get sub-queue name as string
    pub fn as_str(&self) -> &str {
        match self {
            Self::Timeout => "timeout",
            Self::Discarded => "discarded",
            Self::Errors => "errors",
        }
    }
}

impl fmt::Display for SubQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SubQueue {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "timeout" => Ok(Self::Timeout),
            "discarded" => Ok(Self::Discarded),
            "errors" => Ok(Self::Errors),
            other => Err(ValidationError::InvalidFormat {
                field: "subqueue".to_string(),
                message: format!("unknown sub-queue '{}'", other),
            }),
        }
    }
}

// ============================================================================
// Endpoint
// ============================================================================

/// An addressable queue location
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    scheme: String,
    host: String,
    port: u16,
    queue: QueueName,
    subqueue: Option<SubQueue>,
}

impl Endpoint {
    /// Build an endpoint from parts
    pub fn new(
        scheme: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        queue: QueueName,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
            port,
            queue,
            subqueue: None,
        }
    }

    /// Parse an endpoint URI.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use carrier_queue::Endpoint;
    ///
    /// let endpoint = Endpoint::parse("carrier://localhost:2201/orders").unwrap();
    /// assert_eq!(endpoint.port(), 2201);
    /// assert_eq!(endpoint.queue().as_str(), "orders");
    ///
    /// // Port defaults to 2200 when unspecified
    /// let endpoint = Endpoint::parse("carrier://localhost/orders").unwrap();
    /// assert_eq!(endpoint.port(), 2200);
    /// ```
    pub fn parse(uri: &str) -> Result<Self, ValidationError> {
        let (scheme, rest) = uri.split_once("://").ok_or_else(|| {
            ValidationError::InvalidFormat {
                field: "endpoint".to_string(),
                message: format!("'{}' is missing a scheme", uri),
            }
        })?;

        if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ValidationError::InvalidFormat {
                field: "endpoint".to_string(),
                message: format!("invalid scheme '{}'", scheme),
            });
        }

        let (authority, path) = rest.split_once('/').ok_or_else(|| {
            ValidationError::InvalidFormat {
                field: "endpoint".to_string(),
                message: format!("'{}' is missing a queue path", uri),
            }
        })?;

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    ValidationError::InvalidFormat {
                        field: "endpoint".to_string(),
                        message: format!("invalid port in '{}'", authority),
                    }
                })?;
                (host, port)
            }
            None => (authority, DEFAULT_PORT),
        };

        if host.is_empty() {
            return Err(ValidationError::Required {
                field: "endpoint host".to_string(),
            });
        }

        let (queue_part, subqueue) = match path.split_once(SUBQUEUE_SUFFIX) {
            Some((queue_part, sub)) => (queue_part, Some(sub.parse::<SubQueue>()?)),
            None => (path, None),
        };

        Ok(Self {
            scheme: scheme.to_string(),
            host: host.to_string(),
            port,
            queue: QueueName::new(queue_part)?,
            subqueue,
        })
    }

    /// URI scheme (selects the queue engine)
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Peer host
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Peer port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Queue named by the URI path
    pub fn queue(&self) -> &QueueName {
        &self.queue
    }

    /// Sub-queue addressed by the reserved suffix, if any
    pub fn subqueue(&self) -> Option<SubQueue> {
        self.subqueue
    }

    /// Address a sub-queue of this endpoint
    pub fn with_subqueue(&self, subqueue: SubQueue) -> Self {
        Self {
            subqueue: Some(subqueue),
            ..self.clone()
        }
    }

    /// Address the main queue of this endpoint
    pub fn main_queue(&self) -> Self {
        Self {
            subqueue: None,
            ..self.clone()
        }
    }

    /// Full URI form
    pub fn uri(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}:{}/{}",
            self.scheme, self.host, self.port, self.queue
        )?;
        if let Some(sub) = self.subqueue {
            write!(f, "{}{}", SUBQUEUE_SUFFIX, sub)?;
        }
        Ok(())
    }
}

impl FromStr for Endpoint {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Endpoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Endpoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let uri = String::deserialize(deserializer)?;
        Endpoint::parse(&uri).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[path = "endpoint_tests.rs"]
mod tests;
