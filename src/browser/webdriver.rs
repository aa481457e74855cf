/// W3C WebDriver client
///
/// Drives Chrome through a running WebDriver endpoint (chromedriver) using
/// the JSON wire protocol over blocking HTTP. Only the handful of commands the
/// retrieval procedure needs are implemented.
///
/// Protocol reference: https://www.w3.org/TR/webdriver2/

use reqwest::Method;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;

use super::{BrowserError, BrowserLauncher, Element, Page, Target};
use crate::config::RunEnvironment;
use crate::logging::{self, Stage};

/// Key under which WebDriver returns element references.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

const HEADLESS_ARGS: &[&str] = &[
    "--headless=new",
    "--no-sandbox",
    "--disable-dev-shm-usage",
    "--disable-gpu",
    "--window-size=1920,1080",
];

// ============================================================================
// Launcher
// ============================================================================

/// Creates Chrome sessions on a WebDriver endpoint.
pub struct WebDriverLauncher {
    endpoint: String,
    client: reqwest::blocking::Client,
}

impl WebDriverLauncher {
    pub fn new(endpoint: &str) -> Result<Self, BrowserError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| BrowserError::Launch(e.to_string()))?;
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
        })
    }
}

/// New-session capabilities: Chrome saving downloads into `download_dir`
/// without a prompt, headless on servers.
pub fn chrome_capabilities(download_dir: &Path, environment: RunEnvironment) -> Value {
    let args: Vec<&str> = match environment {
        RunEnvironment::Server => HEADLESS_ARGS.to_vec(),
        RunEnvironment::Local => Vec::new(),
    };

    json!({
        "capabilities": {
            "alwaysMatch": {
                "browserName": "chrome",
                "goog:chromeOptions": {
                    "args": args,
                    "prefs": {
                        "download.default_directory": download_dir.to_string_lossy(),
                        "download.prompt_for_download": false,
                        "download.directory_upgrade": true
                    }
                }
            }
        }
    })
}

impl BrowserLauncher for WebDriverLauncher {
    fn launch(
        &self,
        download_dir: &Path,
        environment: RunEnvironment,
    ) -> Result<Box<dyn Page>, BrowserError> {
        // Chrome silently ignores a relative or missing download directory
        std::fs::create_dir_all(download_dir).map_err(|e| BrowserError::Launch(e.to_string()))?;
        let download_dir = download_dir
            .canonicalize()
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let response = self
            .client
            .post(format!("{}/session", self.endpoint))
            .json(&chrome_capabilities(&download_dir, environment))
            .send()
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let value = unwrap_response(response)?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| BrowserError::Launch("no sessionId in response".to_string()))?
            .to_string();

        let mut session = WebDriverSession {
            base: format!("{}/session/{}", self.endpoint, session_id),
            client: self.client.clone(),
        };

        if environment == RunEnvironment::Local {
            if let Err(e) = session.command(Method::POST, "/window/maximize", Some(json!({}))) {
                logging::debug(Stage::Web, None, &format!("maximize failed: {}", e));
            }
        }

        logging::info(
            Stage::Web,
            None,
            &format!("Browser session {} started (downloads → {})", session_id, download_dir.display()),
        );
        Ok(Box::new(session))
    }
}

// ============================================================================
// Session
// ============================================================================

/// A live WebDriver session. Deleted when dropped.
pub struct WebDriverSession {
    base: String,
    client: reqwest::blocking::Client,
}

impl WebDriverSession {
    fn command(&mut self, method: Method, path: &str, body: Option<Value>) -> Result<Value, BrowserError> {
        let mut request = self.client.request(method, format!("{}{}", self.base, path));
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().map_err(|e| BrowserError::Http(e.to_string()))?;
        unwrap_response(response)
    }

    fn element_path(element: &Element, suffix: &str) -> String {
        format!("/element/{}{}", element.0, suffix)
    }
}

/// Extracts `value` from a WebDriver response, turning error payloads into
/// `BrowserError::Command`.
fn unwrap_response(response: reqwest::blocking::Response) -> Result<Value, BrowserError> {
    let status = response.status();
    let body: Value = response
        .json()
        .map_err(|e| BrowserError::Http(format!("{} (status {})", e, status)))?;
    parse_payload(status.is_success(), body)
}

fn parse_payload(success: bool, mut body: Value) -> Result<Value, BrowserError> {
    let value = body.get_mut("value").map(Value::take).unwrap_or(Value::Null);
    if success {
        return Ok(value);
    }
    Err(BrowserError::Command {
        error: value
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string(),
        message: value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}

fn element_from_value(value: &Value) -> Option<Element> {
    value
        .get(ELEMENT_KEY)
        .and_then(Value::as_str)
        .map(|id| Element(id.to_string()))
}

fn is_no_such_element(err: &BrowserError) -> bool {
    matches!(err, BrowserError::Command { error, .. }
        if error == "no such element" || error == "stale element reference")
}

impl Page for WebDriverSession {
    fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        self.command(Method::POST, "/url", Some(json!({ "url": url })))?;
        Ok(())
    }

    fn find(&mut self, target: &Target) -> Result<Option<Element>, BrowserError> {
        let body = json!({ "using": "xpath", "value": target.to_xpath() });
        match self.command(Method::POST, "/element", Some(body)) {
            Ok(value) => Ok(element_from_value(&value)),
            Err(e) if is_no_such_element(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn is_interactable(&mut self, element: &Element) -> Result<bool, BrowserError> {
        let displayed = self.command(Method::GET, &Self::element_path(element, "/displayed"), None);
        let displayed = match displayed {
            Ok(v) => v.as_bool().unwrap_or(false),
            Err(e) if is_no_such_element(&e) => return Ok(false),
            Err(e) => return Err(e),
        };
        if !displayed {
            return Ok(false);
        }
        let enabled = self.command(Method::GET, &Self::element_path(element, "/enabled"), None)?;
        Ok(enabled.as_bool().unwrap_or(false))
    }

    fn attribute(&mut self, element: &Element, name: &str) -> Result<Option<String>, BrowserError> {
        let path = Self::element_path(element, &format!("/attribute/{}", name));
        let value = self.command(Method::GET, &path, None)?;
        Ok(value.as_str().map(String::from))
    }

    fn click(&mut self, element: &Element) -> Result<(), BrowserError> {
        self.command(Method::POST, &Self::element_path(element, "/click"), Some(json!({})))?;
        Ok(())
    }

    fn script_click(&mut self, element: &Element) -> Result<(), BrowserError> {
        let body = json!({
            "script": "arguments[0].click();",
            "args": [{ ELEMENT_KEY: element.0 }]
        });
        self.command(Method::POST, "/execute/sync", Some(body))?;
        Ok(())
    }

    fn clear(&mut self, element: &Element) -> Result<(), BrowserError> {
        self.command(Method::POST, &Self::element_path(element, "/clear"), Some(json!({})))?;
        Ok(())
    }

    fn type_text(&mut self, element: &Element, text: &str) -> Result<(), BrowserError> {
        let path = Self::element_path(element, "/value");
        self.command(Method::POST, &path, Some(json!({ "text": text })))?;
        Ok(())
    }
}

impl Drop for WebDriverSession {
    fn drop(&mut self) {
        match self.client.delete(&self.base).send() {
            Ok(_) => logging::info(Stage::Web, None, "Browser session closed"),
            Err(e) => logging::warn(Stage::Web, None, &format!("closing browser session failed: {}", e)),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
