use std::io::Write;
use std::path::{Path, PathBuf};

use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde_json::json;

use tutor_core::model::Code;

/// Where requests go and who they are made for.
pub struct Daemon {
    pub url: String,
    pub user: String,
    /// Skip pretty-printing (raw JSON for piping)
    pub raw: bool,
}

pub fn client() -> reqwest::Client {
    reqwest::Client::new()
}

pub fn exit_error(message: &str, docs_hint: Option<&str>) -> ! {
    let mut err = json!({
        "error": "cli_error",
        "message": message
    });
    if let Some(hint) = docs_hint {
        err["docs_hint"] = json!(hint);
    }
    eprintln!("{}", render(&err, false));
    std::process::exit(4);
}

fn render(value: &serde_json::Value, raw: bool) -> String {
    let rendered = if raw {
        serde_json::to_string(value)
    } else {
        serde_json::to_string_pretty(value)
    };
    rendered.unwrap_or_else(|_| value.to_string())
}

/// Exit codes: 0=success (2xx), 1=client error (4xx), 2=server error (5xx),
///             3=connection error, 4=usage error
pub fn exit_code_for(status: u16) -> i32 {
    match status {
        200..=299 => 0,
        400..=499 => 1,
        _ => 2,
    }
}

impl Daemon {
    fn url_for(&self, path: &str, query: &[(&str, String)]) -> Result<reqwest::Url, i32> {
        match reqwest::Url::parse(&format!("{}{path}", self.url)) {
            Ok(mut u) => {
                if !query.is_empty() {
                    let mut q = u.query_pairs_mut();
                    for (k, v) in query {
                        q.append_pair(k, v);
                    }
                }
                Ok(u)
            }
            Err(e) => {
                let err = json!({
                    "error": "cli_error",
                    "message": format!("Invalid URL: {}{path}: {e}", self.url)
                });
                eprintln!("{}", render(&err, self.raw));
                Err(4)
            }
        }
    }

    fn builder(
        &self,
        method: reqwest::Method,
        url: reqwest::Url,
        body: Option<serde_json::Value>,
    ) -> reqwest::RequestBuilder {
        let mut req = client()
            .request(method, url)
            .header("x-user-id", self.user.as_str());
        if let Some(b) = body {
            req = req.json(&b);
        }
        req
    }

    fn connection_error(&self, e: reqwest::Error) -> i32 {
        let err = json!({
            "error": "connection_error",
            "message": format!("{e}"),
            "docs_hint": "Is tutord running? Check TUTOR_URL."
        });
        eprintln!("{}", render(&err, self.raw));
        3
    }

    /// Send a request, print the JSON response and return the exit code.
    pub async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<serde_json::Value>,
        query: &[(&str, String)],
    ) -> i32 {
        let url = match self.url_for(path, query) {
            Ok(u) => u,
            Err(code) => return code,
        };

        let resp = match self.builder(method, url, body).send().await {
            Ok(r) => r,
            Err(e) => return self.connection_error(e),
        };

        let exit_code = exit_code_for(resp.status().as_u16());
        let text = resp.text().await.unwrap_or_default();
        // 204 and friends
        if text.trim().is_empty() {
            return exit_code;
        }
        let resp_body: serde_json::Value = serde_json::from_str(&text).unwrap_or_else(
            |e| json!({"raw_error": format!("Failed to parse response as JSON: {e}"), "body": text}),
        );

        let formatted = render(&resp_body, self.raw);
        if exit_code == 0 {
            println!("{formatted}");
        } else {
            eprintln!("{formatted}");
        }
        exit_code
    }

    pub async fn get(&self, path: &str) -> i32 {
        self.request(reqwest::Method::GET, path, None, &[]).await
    }

    pub async fn post(&self, path: &str, body: Option<serde_json::Value>) -> i32 {
        self.request(reqwest::Method::POST, path, body, &[]).await
    }

    /// POST with `?stream=true` and print `token` events as they arrive.
    /// The final `done` payload is printed as JSON after the streamed text.
    pub async fn stream(&self, path: &str, body: serde_json::Value) -> i32 {
        let url = match self.url_for(path, &[("stream", "true".to_string())]) {
            Ok(u) => u,
            Err(code) => return code,
        };
        let mut es = match EventSource::new(self.builder(reqwest::Method::POST, url, Some(body))) {
            Ok(es) => es,
            Err(e) => {
                let err = json!({"error": "cli_error", "message": format!("Failed to open stream: {e}")});
                eprintln!("{}", render(&err, self.raw));
                return 4;
            }
        };

        let mut stdout = std::io::stdout();
        while let Some(event) = es.next().await {
            let step = match event {
                Ok(Event::Open) => continue,
                Ok(Event::Message(msg)) => StreamStep::from_event(&msg.event, &msg.data),
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(reqwest_eventsource::Error::InvalidStatusCode(status, resp)) => {
                    es.close();
                    let body: serde_json::Value = resp
                        .json()
                        .await
                        .unwrap_or(json!({"error": "non-json response"}));
                    eprintln!("{}", render(&body, self.raw));
                    return exit_code_for(status.as_u16());
                }
                Err(reqwest_eventsource::Error::Transport(e)) => {
                    es.close();
                    return self.connection_error(e);
                }
                Err(e) => {
                    es.close();
                    let err = json!({"error": "stream_error", "message": e.to_string()});
                    eprintln!("{}", render(&err, self.raw));
                    return 2;
                }
            };
            match step {
                StreamStep::Token(content) => {
                    print!("{content}");
                    let _ = stdout.flush();
                }
                StreamStep::Done(payload) => {
                    es.close();
                    println!();
                    println!("{}", render(&payload, self.raw));
                    return 0;
                }
                StreamStep::Failed(payload) => {
                    es.close();
                    println!();
                    eprintln!("{}", render(&payload, self.raw));
                    return 2;
                }
                StreamStep::Skip => {}
            }
        }
        es.close();
        println!();
        eprintln!(
            "{}",
            render(
                &json!({"error": "stream_incomplete", "message": "Stream ended without a done event"}),
                self.raw
            )
        );
        2
    }
}

/// What one server-sent event from a pairing stream means for the terminal.
#[derive(Debug, PartialEq)]
pub enum StreamStep {
    Token(String),
    Done(serde_json::Value),
    Failed(serde_json::Value),
    Skip,
}

impl StreamStep {
    pub fn from_event(name: &str, data: &str) -> Self {
        let payload = || serde_json::from_str(data).unwrap_or_else(|_| json!(data));
        match name {
            "token" => match serde_json::from_str::<serde_json::Value>(data) {
                Ok(v) => v["content"]
                    .as_str()
                    .map(|c| StreamStep::Token(c.to_string()))
                    .unwrap_or(StreamStep::Skip),
                Err(_) => StreamStep::Skip,
            },
            "done" => StreamStep::Done(payload()),
            "error" => StreamStep::Failed(payload()),
            _ => StreamStep::Skip,
        }
    }
}

/// Read files into a code snapshot keyed by file name. Directories are
/// read one level deep.
pub fn read_code(paths: &[PathBuf]) -> Result<Code, String> {
    let mut code = Code::new();
    for path in paths {
        if path.is_dir() {
            let entries = std::fs::read_dir(path)
                .map_err(|e| format!("Failed to read directory '{}': {e}", path.display()))?;
            for entry in entries {
                let entry = entry.map_err(|e| format!("Failed to read '{}': {e}", path.display()))?;
                if entry.path().is_file() {
                    insert_file(&mut code, &entry.path())?;
                }
            }
        } else {
            insert_file(&mut code, path)?;
        }
    }
    if code.is_empty() {
        return Err("No source files given".to_string());
    }
    Ok(code)
}

fn insert_file(code: &mut Code, path: &Path) -> Result<(), String> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| format!("Not a file: '{}'", path.display()))?;
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read file '{}': {e}", path.display()))?;
    if code.insert(name.clone(), content).is_some() {
        return Err(format!("Duplicate file name '{name}'"));
    }
    Ok(())
}
