// API-version resolution for callers that omit `api_version`.

use crate::cluster::ClusterClient;

use super::PortForwardError;

/// API version of the core group.
pub const CORE_API_VERSION: &str = "v1";

/// Best-guess API version for a kind.
///
/// This is a heuristic table. CRDs and aggregated APIs may be served under a
/// different version; those callers must pass `api_version` explicitly.
pub fn guess_api_version(kind: &str) -> &'static str {
    match kind.to_ascii_lowercase().as_str() {
        "deployment" | "replicaset" | "statefulset" | "daemonset" => "apps/v1",
        "ingress" => "networking.k8s.io/v1",
        "job" | "cronjob" => "batch/v1",
        _ => CORE_API_VERSION,
    }
}

/// Resolve the API version to use for `kind`.
///
/// Pods short-circuit to the core version without touching the cluster.
/// Other kinds are looked up once under the guessed version; a failed lookup
/// is reported as [`PortForwardError::VersionResolutionFailed`].
pub async fn resolve_api_version(
    client: &dyn ClusterClient,
    namespace: &str,
    name: &str,
    kind: &str,
) -> Result<String, PortForwardError> {
    if kind.eq_ignore_ascii_case("pod") {
        return Ok(CORE_API_VERSION.to_string());
    }

    let guess = guess_api_version(kind);
    client
        .fetch_resource(namespace, name, kind, guess)
        .await
        .map_err(|source| PortForwardError::VersionResolutionFailed {
            kind: kind.to_string(),
            name: name.to_string(),
            source,
        })?;
    tracing::debug!(kind, name, api_version = guess, "resolved api version");
    Ok(guess.to_string())
}
