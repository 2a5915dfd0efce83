use drover_domain::{JoinConfig, Link};
use serde_json::json;

use crate::error::GenError;
use crate::version::at_least;

/// Versions from here on accept multi-document machine configs; older nodes
/// receive no join document at all.
const MULTI_DOC_MAJOR: u64 = 1;
const MULTI_DOC_MINOR: u64 = 5;

/// Render the multi-document join config (siderolink API, event sink, kmsg
/// log) for a node, or `None` when its version predates multi-doc support.
pub fn render_join_document(
    join: &JoinConfig,
    link: Option<&Link>,
    talos_version: &str,
) -> Result<Option<String>, GenError> {
    if !at_least(talos_version, MULTI_DOC_MAJOR, MULTI_DOC_MINOR) {
        return Ok(None);
    }

    let mut api_url = join.siderolink_api_url.clone();
    if join.use_grpc_tunnel {
        let separator = if api_url.contains('?') { '&' } else { '?' };
        api_url = format!("{}{}grpc_tunnel=true", api_url, separator);
    }

    let mut documents = vec![json!({
        "apiVersion": "v1alpha1",
        "kind": "SideroLinkConfig",
        "apiUrl": api_url,
    })];

    // The event sink listens inside the tunnel; without a link there is no
    // in-tunnel address to point the node at.
    if let Some(link) = link {
        if !link.virtual_addrport.is_empty() {
            let host = link
                .virtual_addrport
                .rsplit_once(':')
                .map(|(host, _)| host.to_string())
                .unwrap_or_else(|| link.virtual_addrport.clone());
            documents.push(json!({
                "apiVersion": "v1alpha1",
                "kind": "EventSinkConfig",
                "endpoint": format!("{}:{}", host, join.event_sink_port),
            }));
        }
    }

    if !join.kmsg_log_url.is_empty() {
        documents.push(json!({
            "apiVersion": "v1alpha1",
            "kind": "KmsgLogConfig",
            "name": "drover-kmsg",
            "url": join.kmsg_log_url,
        }));
    }

    let mut out = String::new();
    for (i, doc) in documents.iter().enumerate() {
        if i > 0 {
            out.push_str("---\n");
        }
        let yaml_doc: serde_yaml::Value =
            serde_yaml::to_value(doc).map_err(GenError::Render)?;
        out.push_str(&serde_yaml::to_string(&yaml_doc).map_err(GenError::Render)?);
    }
    Ok(Some(out))
}
