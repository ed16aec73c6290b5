//! HTTPListenerPolicy translation: access logging

use std::collections::BTreeMap;

use kgateway_common::crd::{AccessLog, AccessLogFilter, HTTPListenerPolicy, StatusCodeFilter};
use kgateway_common::{Error, ObjectSource, Result};
use serde::Serialize;

use crate::extension::{BackendDescriptor, ExtensionResolver};

/// Valid HTTP status codes
const STATUS_RANGE: std::ops::RangeInclusive<u16> = 100..=599;

/// Line format for a file sink
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LogFormat {
    /// Envoy's default text format
    Default,
    /// Envoy format string
    Text(String),
    /// Field name to command operator
    Json(BTreeMap<String, String>),
}

/// Where access log lines go
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AccessLogSink {
    /// Local file
    File {
        /// Output path
        path: String,
        /// Line format
        format: LogFormat,
    },
    /// gRPC access log service
    Grpc {
        /// Log name reported to the service
        log_name: String,
        /// Resolved service
        backend: BackendDescriptor,
    },
}

/// One translated access log
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessLogIr {
    /// Destination
    pub sink: AccessLogSink,
    /// Inclusive status range, if filtered
    pub status_code: Option<StatusCodeFilter>,
    /// Skip health check requests
    pub exclude_health_checks: bool,
}

/// Translate every access log of a listener policy, reporting all problems
pub fn translate_access_logs(
    policy: &HTTPListenerPolicy,
    resolver: &ExtensionResolver,
) -> Result<Vec<AccessLogIr>> {
    let source = ObjectSource::of(policy);
    let mut logs = Vec::with_capacity(policy.spec.access_log.len());
    let mut errors = Vec::new();

    for (i, log) in policy.spec.access_log.iter().enumerate() {
        match translate_one(&source, i, log, resolver) {
            Ok(ir) => logs.push(ir),
            Err(e) => errors.push(e),
        }
    }

    Error::join(errors)?;
    Ok(logs)
}

fn translate_one(
    source: &ObjectSource,
    index: usize,
    log: &AccessLog,
    resolver: &ExtensionResolver,
) -> Result<AccessLogIr> {
    let invalid = |msg: &str| {
        Error::policy_invalid_field(source.namespaced_name(), format!("spec.accessLog[{index}]"), msg)
    };

    let sink = match (&log.file_sink, &log.grpc_service) {
        (Some(file), None) => {
            let format = match (&file.string_format, &file.json_format) {
                (None, None) => LogFormat::Default,
                (Some(text), None) => LogFormat::Text(text.clone()),
                (None, Some(json)) => LogFormat::Json(json.clone()),
                (Some(_), Some(_)) => {
                    return Err(invalid("fileSink may set stringFormat or jsonFormat, not both"))
                }
            };
            if file.path.is_empty() {
                return Err(invalid("fileSink.path is required"));
            }
            AccessLogSink::File {
                path: file.path.clone(),
                format,
            }
        }
        (None, Some(grpc)) => AccessLogSink::Grpc {
            log_name: grpc.log_name.clone(),
            backend: resolver.resolve(source, grpc.backend_ref.as_ref())?,
        },
        _ => return Err(invalid("exactly one of fileSink or grpcService is required")),
    };

    let AccessLogFilter {
        status_code,
        exclude_health_checks,
    } = log.filter.clone().unwrap_or_default();
    if let Some(range) = status_code {
        if !STATUS_RANGE.contains(&range.min)
            || !STATUS_RANGE.contains(&range.max)
            || range.min > range.max
        {
            return Err(invalid("filter.statusCode must be a range within 100-599"));
        }
    }

    Ok(AccessLogIr {
        sink,
        status_code,
        exclude_health_checks,
    })
}
