//! The two stateless RPC services exposed over smart HTTP.

use std::fmt;

/// A git service reachable through the smart protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    /// `git-upload-pack`: serves fetch and clone.
    UploadPack,
    /// `git-receive-pack`: accepts pushes.
    ReceivePack,
}

impl Service {
    /// All services, in routing order.
    pub const ALL: [Service; 2] = [Service::UploadPack, Service::ReceivePack];

    /// Parses the bare RPC name (`upload-pack`, `receive-pack`).
    pub fn from_rpc_name(name: &str) -> Option<Self> {
        match name {
            "upload-pack" => Some(Self::UploadPack),
            "receive-pack" => Some(Self::ReceivePack),
            _ => None,
        }
    }

    /// Parses the value of the `service` query parameter (`git-upload-pack`).
    pub fn from_query_value(value: &str) -> Option<Self> {
        value.strip_prefix("git-").and_then(Self::from_rpc_name)
    }

    /// The git subcommand, e.g. `upload-pack`.
    pub fn rpc_name(&self) -> &'static str {
        match self {
            Self::UploadPack => "upload-pack",
            Self::ReceivePack => "receive-pack",
        }
    }

    /// The service name used on the wire, e.g. `git-upload-pack`.
    pub fn service_name(&self) -> &'static str {
        match self {
            Self::UploadPack => "git-upload-pack",
            Self::ReceivePack => "git-receive-pack",
        }
    }

    /// Content type of the `info/refs` advertisement.
    pub fn advertisement_content_type(&self) -> &'static str {
        match self {
            Self::UploadPack => "application/x-git-upload-pack-advertisement",
            Self::ReceivePack => "application/x-git-receive-pack-advertisement",
        }
    }

    /// Content type a client must declare on the RPC request body.
    pub fn request_content_type(&self) -> &'static str {
        match self {
            Self::UploadPack => "application/x-git-upload-pack-request",
            Self::ReceivePack => "application/x-git-receive-pack-request",
        }
    }

    /// Content type of the RPC response body.
    pub fn result_content_type(&self) -> &'static str {
        match self {
            Self::UploadPack => "application/x-git-upload-pack-result",
            Self::ReceivePack => "application/x-git-receive-pack-result",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.service_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_value() {
        assert_eq!(
            Service::from_query_value("git-upload-pack"),
            Some(Service::UploadPack)
        );
        assert_eq!(
            Service::from_query_value("git-receive-pack"),
            Some(Service::ReceivePack)
        );
        assert_eq!(Service::from_query_value("upload-pack"), None);
        assert_eq!(Service::from_query_value("git-upload-archive"), None);
        assert_eq!(Service::from_query_value(""), None);
    }

    #[test]
    fn test_content_types_follow_rpc_name() {
        for service in Service::ALL {
            let rpc = service.rpc_name();
            assert_eq!(
                service.advertisement_content_type(),
                format!("application/x-git-{rpc}-advertisement")
            );
            assert_eq!(
                service.request_content_type(),
                format!("application/x-git-{rpc}-request")
            );
            assert_eq!(
                service.result_content_type(),
                format!("application/x-git-{rpc}-result")
            );
            assert_eq!(service.to_string(), format!("git-{rpc}"));
            assert_eq!(Service::from_rpc_name(rpc), Some(service));
        }
    }
}
