//! Thin wrapper over supervisord's XML-RPC surface. On unix the RPC
//! endpoint is dialed over `/var/run/supervisor.sock` (the URL host in the
//! request line is irrelevant and kept as `dummy`); everywhere else it
//! falls back to the TCP inet-http-server endpoint.

use super::error::SupervisorError;
use super::xmlrpc::{decode_response, encode_request, Value};
use crate::model::SupervisorProcessInfo;
use std::io::{Read, Write};
use std::time::Duration;

#[cfg(unix)]
const UNIX_SOCKET_PATH: &str = "/var/run/supervisor.sock";
const TCP_ENDPOINT: &str = "http://127.0.0.1:9002/RPC2";

const RPC_TIMEOUT: Duration = Duration::from_secs(10);

enum Transport {
    #[cfg(unix)]
    Unix { socket_path: String },
    Tcp { client: reqwest::blocking::Client, url: String },
}

pub struct SupervisorClient {
    transport: Transport,
}

impl SupervisorClient {
    /// Builds a client for the platform's native transport: a unix socket
    /// on unix, TCP everywhere else.
    pub fn new() -> Result<Self, SupervisorError> {
        #[cfg(unix)]
        {
            Ok(Self {
                transport: Transport::Unix {
                    socket_path: UNIX_SOCKET_PATH.to_string(),
                },
            })
        }
        #[cfg(not(unix))]
        {
            Self::new_tcp(TCP_ENDPOINT)
        }
    }

    pub fn new_tcp(url: &str) -> Result<Self, SupervisorError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(RPC_TIMEOUT)
            .build()?;
        Ok(Self {
            transport: Transport::Tcp {
                client,
                url: url.to_string(),
            },
        })
    }

    #[cfg(unix)]
    pub fn new_unix(socket_path: &str) -> Self {
        Self {
            transport: Transport::Unix {
                socket_path: socket_path.to_string(),
            },
        }
    }

    fn call(&self, method: &str, params: &[Value]) -> Result<Value, SupervisorError> {
        let body = encode_request(method, params)?;
        let response_body = match &self.transport {
            #[cfg(unix)]
            Transport::Unix { socket_path } => self.call_unix(socket_path, &body)?,
            Transport::Tcp { client, url } => self.call_tcp(client, url, &body)?,
        };
        decode_response(&response_body)
    }

    #[cfg(unix)]
    fn call_unix(&self, socket_path: &str, body: &[u8]) -> Result<Vec<u8>, SupervisorError> {
        use std::os::unix::net::UnixStream;

        let mut stream = UnixStream::connect(socket_path).map_err(|source| SupervisorError::Transport {
            endpoint: socket_path.to_string(),
            source,
        })?;
        stream
            .set_read_timeout(Some(RPC_TIMEOUT))
            .map_err(|source| SupervisorError::Transport {
                endpoint: socket_path.to_string(),
                source,
            })?;

        let request = format!(
            "POST /RPC2 HTTP/1.1\r\nHost: dummy\r\nContent-Type: text/xml\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        stream
            .write_all(request.as_bytes())
            .and_then(|_| stream.write_all(body))
            .map_err(|source| SupervisorError::Transport {
                endpoint: socket_path.to_string(),
                source,
            })?;

        let mut raw = Vec::new();
        stream
            .read_to_end(&mut raw)
            .map_err(|source| SupervisorError::Transport {
                endpoint: socket_path.to_string(),
                source,
            })?;
        extract_http_body(&raw)
    }

    fn call_tcp(
        &self,
        client: &reqwest::blocking::Client,
        url: &str,
        body: &[u8],
    ) -> Result<Vec<u8>, SupervisorError> {
        let response = client
            .post(url)
            .header("Content-Type", "text/xml")
            .body(body.to_vec())
            .send()?;
        Ok(response.bytes()?.to_vec())
    }

    pub fn get_state(&self) -> Result<(i64, String), SupervisorError> {
        let value = self.call("supervisor.getState", &[])?;
        let statecode = value.field("statecode")?.as_i64()?;
        let statename = value.field("statename")?.as_str()?.to_string();
        Ok((statecode, statename))
    }

    /// Liveness probe: any transport or decode error means "not running".
    pub fn is_running(&self) -> bool {
        self.get_state().is_ok()
    }

    pub fn get_all_process_info(&self) -> Result<Vec<SupervisorProcessInfo>, SupervisorError> {
        let value = self.call("supervisor.getAllProcessInfo", &[])?;
        value.as_array()?.iter().map(process_info_from_value).collect()
    }

    pub fn tail_stdout(&self, name: &str, offset: i64, length: i64) -> Result<TailLog, SupervisorError> {
        self.tail("supervisor.tailProcessStdoutLog", name, offset, length)
    }

    pub fn tail_stderr(&self, name: &str, offset: i64, length: i64) -> Result<TailLog, SupervisorError> {
        self.tail("supervisor.tailProcessStderrLog", name, offset, length)
    }

    fn tail(&self, method: &str, name: &str, offset: i64, length: i64) -> Result<TailLog, SupervisorError> {
        let value = self.call(
            method,
            &[Value::from(name), Value::Int(offset), Value::Int(length)],
        )?;
        let items = value.as_array()?;
        if items.len() != 3 {
            return Err(SupervisorError::Malformed(format!(
                "expected a 3-element tail response, got {}",
                items.len()
            )));
        }
        let bytes = match &items[0] {
            Value::String(s) => s.clone(),
            other => other.as_str().unwrap_or_default().to_string(),
        };
        Ok(TailLog {
            bytes,
            offset: items[1].as_i64()?,
            overflow: items[2].as_bool()?,
        })
    }

    /// Destructive; the caller must invoke this at most once per
    /// (process, cycle) and only after both tails have been captured.
    pub fn clear_process_logs(&self, name: &str) -> Result<bool, SupervisorError> {
        let value = self.call("supervisor.clearProcessLogs", &[Value::from(name)])?;
        value.as_bool()
    }

    /// Returns the `[added, changed, removed]` process-group name lists.
    /// The outer list always has exactly one element.
    pub fn reload_config(&self) -> Result<ReloadResult, SupervisorError> {
        let value = self.call("supervisor.reloadConfig", &[])?;
        let outer = value.as_array()?;
        let inner = outer
            .first()
            .ok_or_else(|| SupervisorError::Malformed("reloadConfig returned an empty outer list".into()))?
            .as_array()?;
        if inner.len() != 3 {
            return Err(SupervisorError::Malformed(format!(
                "expected [added, changed, removed], got {} lists",
                inner.len()
            )));
        }
        Ok(ReloadResult {
            added: string_list(&inner[0])?,
            changed: string_list(&inner[1])?,
            removed: string_list(&inner[2])?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TailLog {
    pub bytes: String,
    pub offset: i64,
    pub overflow: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReloadResult {
    pub added: Vec<String>,
    pub changed: Vec<String>,
    pub removed: Vec<String>,
}

fn string_list(value: &Value) -> Result<Vec<String>, SupervisorError> {
    value
        .as_array()?
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect()
}

fn process_info_from_value(value: &Value) -> Result<SupervisorProcessInfo, SupervisorError> {
    Ok(SupervisorProcessInfo {
        name: value.field("name")?.as_str()?.to_string(),
        group: value.field("group")?.as_str()?.to_string(),
        description: value.field("description")?.as_str().unwrap_or_default().to_string(),
        start: value.field("start")?.as_i64()?,
        stop: value.field("stop")?.as_i64()?,
        now: value.field("now")?.as_i64()?,
        state: value.field("state")?.as_i64()?,
        statename: value.field("statename")?.as_str()?.to_string(),
        spawnerr: value.field("spawnerr")?.as_str().unwrap_or_default().to_string(),
        exitstatus: value.field("exitstatus")?.as_i64()?,
        stdout_logfile: value
            .field("stdout_logfile")?
            .as_str()
            .unwrap_or_default()
            .to_string(),
        stderr_logfile: value
            .field("stderr_logfile")?
            .as_str()
            .unwrap_or_default()
            .to_string(),
        pid: value.field("pid")?.as_i64()?,
    })
}

#[cfg(unix)]
fn extract_http_body(raw: &[u8]) -> Result<Vec<u8>, SupervisorError> {
    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or_else(|| SupervisorError::Malformed("supervisor response had no header/body separator".into()))?;
    Ok(raw[split + 4..].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn extracts_body_past_headers() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: text/xml\r\n\r\n<methodResponse></methodResponse>";
        let body = extract_http_body(raw).unwrap();
        assert_eq!(body, b"<methodResponse></methodResponse>");
    }

    #[test]
    fn process_info_parses_struct_value() {
        let value = Value::Struct(vec![
            ("name".into(), Value::from("worker")),
            ("group".into(), Value::from("workers")),
            ("description".into(), Value::from("pid 1, uptime 0:01:00")),
            ("start".into(), Value::Int(100)),
            ("stop".into(), Value::Int(0)),
            ("now".into(), Value::Int(160)),
            ("state".into(), Value::Int(20)),
            ("statename".into(), Value::from("RUNNING")),
            ("spawnerr".into(), Value::from("")),
            ("exitstatus".into(), Value::Int(0)),
            ("stdout_logfile".into(), Value::from("/var/log/worker.out")),
            ("stderr_logfile".into(), Value::from("/var/log/worker.err")),
            ("pid".into(), Value::Int(4242)),
        ]);
        let info = process_info_from_value(&value).unwrap();
        assert_eq!(info.name, "worker");
        assert!(info.is_running());
        assert_eq!(info.pid, 4242);
    }
}
