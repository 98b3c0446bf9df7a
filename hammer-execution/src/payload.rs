//! Operation bodies for remote calls
//!
//! Builds the XML for the operation element only; wrapping it in an `<rpc>`
//! envelope is the transport's job.

use hammer_config::{Filter, RemoteCall};

use crate::error::ExecutionError;

const DEFAULT_DATASTORE: &str = "running";

/// Render the operation element for a remote call action
pub fn encode_operation(call: &RemoteCall) -> Result<String, ExecutionError> {
    let mut xml = String::new();
    match call.operation.as_str() {
        "get-config" => {
            let source = call.source.as_deref().unwrap_or(DEFAULT_DATASTORE);
            xml.push_str("<get-config><source><");
            xml.push_str(source);
            xml.push_str("/></source>");
            push_filter(&mut xml, call.filter.as_ref());
            xml.push_str("</get-config>");
        }
        "get" => {
            xml.push_str("<get>");
            push_filter(&mut xml, call.filter.as_ref());
            xml.push_str("</get>");
        }
        "edit-config" => {
            let target = call.target.as_deref().unwrap_or(DEFAULT_DATASTORE);
            xml.push_str("<edit-config><target><");
            xml.push_str(target);
            xml.push_str("/></target><config>");
            if let Some(config) = &call.config {
                xml.push_str(config);
            }
            xml.push_str("</config></edit-config>");
        }
        other => return Err(ExecutionError::UnsupportedOperation(other.to_string())),
    }
    Ok(xml)
}

fn push_filter(xml: &mut String, filter: Option<&Filter>) {
    let Some(filter) = filter else {
        return;
    };
    xml.push_str(r#"<filter type=""#);
    xml.push_str(&escape_attr(&filter.kind));
    xml.push_str(r#""><top"#);
    if let Some(ns) = &filter.ns {
        xml.push_str(r#" xmlns=""#);
        xml.push_str(&escape_attr(ns));
        xml.push('"');
    }
    xml.push('>');
    xml.push_str(&filter.select);
    xml.push_str("</top></filter>");
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(operation: &str) -> RemoteCall {
        RemoteCall {
            hostname: "h".to_string(),
            operation: operation.to_string(),
            source: None,
            target: None,
            filter: None,
            config: None,
            expected: None,
        }
    }

    #[test]
    fn test_get_config_defaults_to_running() {
        assert_eq!(
            encode_operation(&call("get-config")).unwrap(),
            "<get-config><source><running/></source></get-config>"
        );
    }

    #[test]
    fn test_get_config_with_filter() {
        let mut c = call("get-config");
        c.source = Some("candidate".to_string());
        c.filter = Some(Filter {
            kind: "subtree".to_string(),
            ns: Some("urn:ietf:params:xml:ns:yang:ietf-interfaces".to_string()),
            select: "<interfaces/>".to_string(),
        });
        assert_eq!(
            encode_operation(&c).unwrap(),
            r#"<get-config><source><candidate/></source><filter type="subtree"><top xmlns="urn:ietf:params:xml:ns:yang:ietf-interfaces"><interfaces/></top></filter></get-config>"#
        );
    }

    #[test]
    fn test_get_without_namespace() {
        let mut c = call("get");
        c.filter = Some(Filter {
            kind: "subtree".to_string(),
            ns: None,
            select: "<system/>".to_string(),
        });
        assert_eq!(
            encode_operation(&c).unwrap(),
            r#"<get><filter type="subtree"><top><system/></top></filter></get>"#
        );
        assert_eq!(encode_operation(&call("get")).unwrap(), "<get></get>");
    }

    #[test]
    fn test_edit_config() {
        let mut c = call("edit-config");
        c.config = Some("<top><leaf>1</leaf></top>".to_string());
        assert_eq!(
            encode_operation(&c).unwrap(),
            "<edit-config><target><running/></target><config><top><leaf>1</leaf></top></config></edit-config>"
        );
    }

    #[test]
    fn test_unsupported_operation() {
        let err = encode_operation(&call("kill-session")).unwrap_err();
        assert_eq!(err.to_string(), "kill-session is not a supported operation");
    }
}
