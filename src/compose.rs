//! Compose Parser (§4.A).
//!
//! Translates a docker-compose-shaped YAML document into a set of candidate
//! backends. This has no direct teacher precedent — `config.rs`'s
//! load-then-validate shape is the model, applied to compose semantics
//! instead of a gateway config file.

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::HubError;

/// A candidate backend yielded by the parser, before it enters the Registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateBackend {
    pub name: String,
    pub base_url: String,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ComposeDocument {
    #[serde(default)]
    services: HashMap<String, ServiceSpec>,
}

#[derive(Debug, Deserialize, Default)]
struct ServiceSpec {
    #[serde(default)]
    ports: Vec<PortMapping>,
    #[serde(default)]
    labels: LabelsField,
}

/// Compose allows `ports` entries to be either a bare `"8081:8080"` string or
/// a long-form mapping `{published: 8081, target: 8080}`. Only the short
/// form is needed to extract a host port for this system's purposes.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PortMapping {
    Short(String),
    Long { published: PublishedPort },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PublishedPort {
    Number(u16),
    Text(String),
}

/// Compose allows `labels` as either a YAML mapping or a list of `"k=v"`
/// strings.
#[derive(Debug, Deserialize, Default)]
#[serde(untagged)]
enum LabelsField {
    #[default]
    Empty,
    Map(HashMap<String, String>),
    List(Vec<String>),
}

const PROXY_SELF_LABEL_KEY: &str = "mcp-hub.service";
const PROXY_SELF_LABEL_VALUE: &str = "proxy";

/// Parse a compose document's raw text and yield candidate backends.
///
/// Services without a host port binding are skipped (not an error). Services
/// labeled `mcp-hub.service=proxy` are skipped (the proxy does not route to
/// itself). A malformed document is a `HubError::Config`; an empty result is
/// not an error.
pub fn parse(raw: &str) -> Result<Vec<CandidateBackend>, HubError> {
    let doc: ComposeDocument = serde_yaml_ng::from_str(raw)
        .map_err(|e| HubError::Config(format!("malformed compose document: {e}")))?;

    let mut backends = Vec::new();
    for (name, spec) in doc.services {
        let labels = labels_to_map(spec.labels);

        if labels.get(PROXY_SELF_LABEL_KEY).map(String::as_str) == Some(PROXY_SELF_LABEL_VALUE) {
            continue;
        }

        let Some(host_port) = first_host_port(&spec.ports) else {
            continue;
        };

        backends.push(CandidateBackend {
            name,
            base_url: format!("http://localhost:{host_port}"),
            labels,
        });
    }

    Ok(backends)
}

fn labels_to_map(labels: LabelsField) -> HashMap<String, String> {
    match labels {
        LabelsField::Empty => HashMap::new(),
        LabelsField::Map(m) => m,
        LabelsField::List(list) => list
            .into_iter()
            .filter_map(|entry| entry.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

/// Extract the host port from the first port mapping that declares one.
/// For the short form `"HOST:CONTAINER"` (or `"HOST:CONTAINER/proto"`), the
/// host port is the segment before the first colon.
fn first_host_port(ports: &[PortMapping]) -> Option<u16> {
    for mapping in ports {
        match mapping {
            PortMapping::Short(spec) => {
                let host_part = spec.split(':').next()?;
                if let Ok(port) = host_part.parse::<u16>() {
                    return Some(port);
                }
            }
            PortMapping::Long { published } => {
                let parsed = match published {
                    PublishedPort::Number(n) => Some(*n),
                    PublishedPort::Text(s) => s.parse().ok(),
                };
                if parsed.is_some() {
                    return parsed;
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_services_without_host_port() {
        let yaml = r#"
services:
  web:
    image: nginx
  worker:
    image: worker
    ports:
      - "8081:8080"
"#;
        let backends = parse(yaml).unwrap();
        assert_eq!(backends.len(), 1);
        assert_eq!(backends[0].name, "worker");
        assert_eq!(backends[0].base_url, "http://localhost:8081");
    }

    #[test]
    fn skips_proxy_self_label() {
        let yaml = r#"
services:
  hub:
    ports:
      - "3000:3000"
    labels:
      mcp-hub.service: proxy
  backend:
    ports:
      - "8081:8080"
"#;
        let backends = parse(yaml).unwrap();
        assert_eq!(backends.len(), 1);
        assert_eq!(backends[0].name, "backend");
    }

    #[test]
    fn accepts_list_form_labels() {
        let yaml = r#"
services:
  backend:
    ports:
      - "8081:8080"
    labels:
      - "mcp-hub.type=search"
      - "mcp-hub.description=web search backend"
"#;
        let backends = parse(yaml).unwrap();
        assert_eq!(backends.len(), 1);
        assert_eq!(
            backends[0].labels.get("mcp-hub.type"),
            Some(&"search".to_string())
        );
    }

    #[test]
    fn first_host_port_of_multiple() {
        let yaml = r#"
services:
  backend:
    ports:
      - "8081:8080"
      - "9090:9090"
"#;
        let backends = parse(yaml).unwrap();
        assert_eq!(backends[0].base_url, "http://localhost:8081");
    }

    #[test]
    fn empty_document_is_not_an_error() {
        let backends = parse("services: {}").unwrap();
        assert!(backends.is_empty());
    }

    #[test]
    fn malformed_document_is_config_error() {
        let result = parse("not: [valid, yaml: structure");
        assert!(matches!(result, Err(HubError::Config(_))));
    }

    #[test]
    fn long_form_port_mapping() {
        let yaml = r#"
services:
  backend:
    ports:
      - published: 8081
        target: 8080
"#;
        let backends = parse(yaml).unwrap();
        assert_eq!(backends[0].base_url, "http://localhost:8081");
    }

    #[test]
    fn unparseable_long_form_port_falls_through_to_next_mapping() {
        let yaml = r#"
services:
  backend:
    ports:
      - published: "not-a-number"
        target: 8080
      - "8081:8080"
"#;
        let backends = parse(yaml).unwrap();
        assert_eq!(backends[0].base_url, "http://localhost:8081");
    }
}
