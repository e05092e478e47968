//! W3C WebDriver client backing real browser sessions.
//!
//! HTTP is done through a curl subprocess with JSON payloads; the driver
//! endpoint (chromedriver, geckodriver, a Selenium hub) is expected to be
//! running already. The per-attempt timeout is enforced with curl's
//! `--max-time`, so a hung driver call surfaces as a timeout instead of
//! blocking the engine.

use base64::Engine;
use serde_json::json;
use std::process::Command;
use std::time::{Duration, Instant};

use crate::browser::{ActionRequest, BrowserCapability, BrowserError, BrowserResult, Locator};
use crate::config::BrowserKind;
use crate::scenario::ActionKind;
use crate::timing::RunMode;

/// Timeout for establishing the HTTP connection to the driver
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Poll interval for `wait_for` actions
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// W3C element id key in find-element responses
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// A live browser session behind a WebDriver endpoint
pub struct WebDriverBrowser {
    endpoint: String,
    session_id: String,
}

impl WebDriverBrowser {
    /// Create a session at `endpoint`. Headless unless the run mode is
    /// `test`, which is the one mode meant for watching the browser work.
    pub fn start(endpoint: &str, browser: BrowserKind, mode: RunMode) -> BrowserResult<Self> {
        let endpoint = endpoint.trim_end_matches('/').to_string();
        let body = session_capabilities(browser, mode);
        let response = http_request(
            &endpoint,
            "POST",
            "/session",
            Some(&body),
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
        )
        .map_err(|err| match err {
            // A driver we cannot even create a session on is a dead session
            BrowserError::Timeout(_) | BrowserError::Action(_) => {
                BrowserError::SessionLost(format!("cannot create session at {}: {}", endpoint, err))
            }
            fatal => fatal,
        })?;

        let session_id = response["value"]["sessionId"]
            .as_str()
            .ok_or_else(|| {
                BrowserError::SessionLost(format!("driver returned no session id: {}", response))
            })?
            .to_string();

        tracing::info!(endpoint = %endpoint, session = %session_id, %browser, "webdriver session created");
        Ok(Self {
            endpoint,
            session_id,
        })
    }

    /// End the session. Also runs on drop, where failures are ignored.
    pub fn close(&mut self) -> BrowserResult<()> {
        if self.session_id.is_empty() {
            return Ok(());
        }
        let path = format!("/session/{}", self.session_id);
        self.session_id = String::new();
        http_request(
            &self.endpoint,
            "DELETE",
            &path,
            None,
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
        )?;
        Ok(())
    }

    fn call(
        &self,
        method: &str,
        path: &str,
        body: Option<&serde_json::Value>,
        timeout: Duration,
    ) -> BrowserResult<serde_json::Value> {
        let path = format!("/session/{}{}", self.session_id, path);
        http_request(&self.endpoint, method, &path, body, timeout)
    }

    fn find_element(&self, locator: &Locator, timeout: Duration) -> BrowserResult<String> {
        let (using, value) = locator.to_webdriver();
        let response = self.call(
            "POST",
            "/element",
            Some(&json!({ "using": using, "value": value })),
            timeout,
        )?;
        response["value"][ELEMENT_KEY]
            .as_str()
            .map(String::from)
            .ok_or_else(|| BrowserError::Action(format!("element not found: {:?}", locator)))
    }

    fn element_call(
        &self,
        element: &str,
        method: &str,
        suffix: &str,
        body: Option<&serde_json::Value>,
        timeout: Duration,
    ) -> BrowserResult<serde_json::Value> {
        self.call(
            method,
            &format!("/element/{}{}", element, suffix),
            body,
            timeout,
        )
    }

    fn execute_script(
        &self,
        script: &str,
        args: serde_json::Value,
        timeout: Duration,
    ) -> BrowserResult<serde_json::Value> {
        self.call(
            "POST",
            "/execute/sync",
            Some(&json!({ "script": script, "args": args })),
            timeout,
        )
    }

    fn js_click(&self, element: &str, timeout: Duration) -> BrowserResult<()> {
        self.execute_script(
            "arguments[0].click();",
            json!([{ ELEMENT_KEY: element }]),
            timeout,
        )?;
        Ok(())
    }

    fn wait_for(&self, locator: &Locator, timeout: Duration) -> BrowserResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(BrowserError::Timeout(timeout));
            }
            match self.find_element(locator, remaining) {
                Ok(_) => return Ok(()),
                Err(BrowserError::Action(_)) => {
                    std::thread::sleep(WAIT_POLL_INTERVAL.min(remaining));
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl BrowserCapability for WebDriverBrowser {
    fn navigate(&mut self, url: &str, timeout: Duration) -> BrowserResult<()> {
        self.call("POST", "/url", Some(&json!({ "url": url })), timeout)?;
        Ok(())
    }

    fn perform(&mut self, request: &ActionRequest, timeout: Duration) -> BrowserResult<()> {
        let locator = Locator::parse(&request.target);
        match request.kind {
            ActionKind::Navigate => self.navigate(&request.target, timeout),
            ActionKind::Input => {
                let element = self.find_element(&locator, timeout)?;
                self.element_call(&element, "POST", "/clear", Some(&json!({})), timeout)?;
                self.element_call(
                    &element,
                    "POST",
                    "/value",
                    Some(&json!({ "text": request.value })),
                    timeout,
                )?;
                Ok(())
            }
            ActionKind::Click => {
                let element = self.find_element(&locator, timeout)?;
                self.element_call(&element, "POST", "/click", Some(&json!({})), timeout)?;
                Ok(())
            }
            // A plain click can be blocked by an overlay; the forced variants
            // bypass hit testing through script execution
            ActionKind::ForceClick | ActionKind::JsClick => {
                let element = self.find_element(&locator, timeout)?;
                self.js_click(&element, timeout)
            }
            ActionKind::Select => {
                let element = self.find_element(&locator, timeout)?;
                self.execute_script(
                    "const el = arguments[0]; el.value = arguments[1]; \
                     el.dispatchEvent(new Event('change', { bubbles: true }));",
                    json!([{ ELEMENT_KEY: element }, request.value]),
                    timeout,
                )?;
                Ok(())
            }
            ActionKind::WaitFor => self.wait_for(&locator, timeout),
            ActionKind::Assert => {
                let element = self.find_element(&locator, timeout)?;
                let response = self.element_call(&element, "GET", "/text", None, timeout)?;
                let text = response["value"].as_str().unwrap_or_default();
                if text.contains(&request.value) {
                    Ok(())
                } else {
                    Err(BrowserError::Action(format!(
                        "assertion failed: expected '{}' in '{}'",
                        request.value, text
                    )))
                }
            }
            ActionKind::Script => {
                let script = if request.value.is_empty() {
                    &request.target
                } else {
                    &request.value
                };
                self.execute_script(script, json!([]), timeout)?;
                Ok(())
            }
        }
    }

    fn screenshot(&mut self) -> BrowserResult<Vec<u8>> {
        let response = self.call(
            "GET",
            "/screenshot",
            None,
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
        )?;
        let encoded = response["value"]
            .as_str()
            .ok_or_else(|| BrowserError::Action("screenshot response has no payload".to_string()))?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| BrowserError::Action(format!("screenshot payload invalid: {}", e)))
    }

    fn is_alive(&mut self) -> bool {
        !self.session_id.is_empty()
            && self
                .call(
                    "GET",
                    "/url",
                    None,
                    Duration::from_secs(CONNECT_TIMEOUT_SECS),
                )
                .is_ok()
    }

    fn set_mode(&mut self, mode: RunMode) {
        // Headless vs. visible was decided at session start
        tracing::debug!(mode = %mode, "run mode forwarded");
    }
}

impl Drop for WebDriverBrowser {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// New-session payload, headless unless the run mode is `test`
fn session_capabilities(browser: BrowserKind, mode: RunMode) -> serde_json::Value {
    let headless = mode != RunMode::Test;
    let mut always_match = json!({ "browserName": browser.capability_name() });

    match browser {
        BrowserKind::Chrome | BrowserKind::Edge => {
            let mut args = vec!["--window-size=1024,768".to_string()];
            if headless {
                args.push("--headless=new".to_string());
            }
            let key = if browser == BrowserKind::Chrome {
                "goog:chromeOptions"
            } else {
                "ms:edgeOptions"
            };
            always_match[key] = json!({ "args": args });
        }
        BrowserKind::Firefox => {
            let mut args = vec!["--width=1024".to_string(), "--height=768".to_string()];
            if headless {
                args.push("-headless".to_string());
            }
            always_match["moz:firefoxOptions"] = json!({ "args": args });
        }
        // Safari has no headless mode
        BrowserKind::Safari => {}
    }

    json!({ "capabilities": { "alwaysMatch": always_match } })
}

/// One driver HTTP call through curl
fn http_request(
    endpoint: &str,
    method: &str,
    path: &str,
    body: Option<&serde_json::Value>,
    timeout: Duration,
) -> BrowserResult<serde_json::Value> {
    let url = format!("{}{}", endpoint, path);
    let max_time = curl_max_time(timeout);
    let connect_timeout = CONNECT_TIMEOUT_SECS.to_string();

    let mut command = Command::new("curl");
    command.args([
        "-s",
        "-X",
        method,
        &url,
        "--connect-timeout",
        &connect_timeout,
        "--max-time",
        &max_time,
    ]);
    let body_json;
    if let Some(body) = body {
        body_json = body.to_string();
        command.args(["-H", "Content-Type: application/json", "-d", &body_json]);
    }

    let output = command
        .output()
        .map_err(|e| BrowserError::SessionLost(format!("cannot run curl: {}", e)))?;

    if !output.status.success() {
        // curl exit 28 is an operation timeout; everything else means the
        // driver endpoint is unreachable
        return match output.status.code() {
            Some(28) => Err(BrowserError::Timeout(timeout)),
            code => Err(BrowserError::SessionLost(format!(
                "driver request failed (curl exit {:?})",
                code
            ))),
        };
    }

    let response: serde_json::Value = serde_json::from_slice(&output.stdout)
        .map_err(|e| BrowserError::Action(format!("invalid driver response: {}", e)))?;
    check_driver_error(&response)?;
    Ok(response)
}

/// `--max-time` value for a deadline: whole seconds, rounded up so a
/// sub-second budget is never shortened to zero
fn curl_max_time(timeout: Duration) -> String {
    ((timeout.as_secs_f64().ceil() as u64).max(1)).to_string()
}

/// Map a WebDriver error payload onto the error taxonomy
fn check_driver_error(response: &serde_json::Value) -> BrowserResult<()> {
    let Some(error) = response["value"]["error"].as_str() else {
        return Ok(());
    };
    let message = response["value"]["message"].as_str().unwrap_or(error);
    match error {
        "invalid session id" | "session not created" | "unknown error" => {
            Err(BrowserError::SessionLost(message.to_string()))
        }
        "timeout" | "script timeout" => Err(BrowserError::Timeout(Duration::ZERO)),
        _ => Err(BrowserError::Action(format!("{}: {}", error, message))),
    }
}
