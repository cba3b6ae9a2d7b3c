//! External identifier codec
//!
//! A created server is addressed on every later call through one opaque
//! string of the form `stackit://<projectID>/<serverID>`. Encoding never
//! fails; decoding rejects anything that does not have the scheme prefix
//! and exactly two non-empty `/`-separated segments.

use crate::error::Error;

/// URI scheme of the external identifier.
pub const ID_SCHEME: &str = "stackit";

/// Decoded form of an external identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineId {
    /// STACKIT project the server lives in.
    pub project_id: String,
    /// Provider-assigned server ID.
    pub server_id: String,
}

/// Build the external identifier for a server.
pub fn encode_machine_id(project_id: &str, server_id: &str) -> String {
    format!("{}://{}/{}", ID_SCHEME, project_id, server_id)
}

/// Parse an external identifier back into its components.
///
/// Fails with [`Error::InvalidArgument`] when the scheme prefix is missing,
/// when there are not exactly two segments after it, or when either segment
/// is empty.
pub fn decode_machine_id(value: &str) -> Result<MachineId, Error> {
    let prefix = format!("{}://", ID_SCHEME);
    let rest = value.strip_prefix(&prefix).ok_or_else(|| {
        Error::invalid_argument(format!(
            "machine ID {:?} does not start with {:?}",
            value, prefix
        ))
    })?;

    let mut segments = rest.split('/');
    let project_id = segments.next().unwrap_or_default();
    let server_id = segments.next().unwrap_or_default();

    if segments.next().is_some() {
        return Err(Error::invalid_argument(format!(
            "machine ID {:?} has more than two segments",
            value
        )));
    }
    if project_id.is_empty() || server_id.is_empty() {
        return Err(Error::invalid_argument(format!(
            "machine ID {:?} has an empty project or server segment",
            value
        )));
    }

    Ok(MachineId {
        project_id: project_id.to_string(),
        server_id: server_id.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_builds_scheme_project_server() {
        assert_eq!(
            encode_machine_id("proj-1", "9f51c5d1"),
            "stackit://proj-1/9f51c5d1"
        );
    }

    #[test]
    fn decode_round_trips_encode() {
        let cases = [
            ("proj-1", "9f51c5d1"),
            ("my-project", "b7e2a3c4-0d55-4f1a-9f00-1234567890ab"),
            ("p", "s"),
        ];
        for (project, server) in cases {
            let id = decode_machine_id(&encode_machine_id(project, server)).unwrap();
            assert_eq!(id.project_id, project);
            assert_eq!(id.server_id, server);
        }
    }

    #[test]
    fn decode_rejects_missing_scheme() {
        let err = decode_machine_id("proj-1/server-1").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));

        // A different scheme is just as invalid
        let err = decode_machine_id("aws://proj-1/server-1").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn decode_rejects_wrong_segment_count() {
        let err = decode_machine_id("stackit://proj-1").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));

        let err = decode_machine_id("stackit://proj-1/server-1/extra").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn decode_rejects_empty_segments() {
        for value in ["stackit:///server-1", "stackit://proj-1/", "stackit:///"] {
            let err = decode_machine_id(value).unwrap_err();
            assert!(matches!(err, Error::InvalidArgument(_)), "value {:?}", value);
        }
    }

    #[test]
    fn decode_rejects_empty_input() {
        assert!(decode_machine_id("").is_err());
    }
}
