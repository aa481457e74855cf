/// Browser seam.
///
/// The retrieval procedure only ever talks to a `Page`: find a control,
/// check it is interactable, click it, type into it, read an attribute.
/// How a `Target` maps onto the portal's DOM is the adapter's business
/// (`webdriver` turns it into XPath); tests substitute an in-memory page.
///
/// Submodules:
/// - `locator`   — bounded wait for a control to become interactable.
/// - `webdriver` — W3C WebDriver client and Chrome launcher.

pub mod locator;
pub mod webdriver;

use std::fmt;
use std::path::Path;

use crate::config::RunEnvironment;

// ---------------------------------------------------------------------------
// Lookup targets
// ---------------------------------------------------------------------------

/// How to find a control on the page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// Element with this `id` attribute.
    Id(String),
    /// Expand/collapse switch beside a tree label.
    GroupToggle(String),
    /// Checkbox beside a tree label.
    LeafCheckbox(String),
    /// Button whose text contains this string.
    Button(String),
    /// Link with this class and exact text.
    Link { class: String, text: String },
    /// Link with this class and exact text inside the dialog with this id.
    DialogLink {
        dialog_id: String,
        class: String,
        text: String,
    },
}

impl Target {
    /// XPath expression selecting the control.
    pub fn to_xpath(&self) -> String {
        match self {
            Target::Id(id) => format!("//*[@id={}]", xpath_literal(id)),
            Target::GroupToggle(label) => format!(
                "//label[text()={}]/parent::a/preceding-sibling::a[contains(@id, '_switch')]",
                xpath_literal(label)
            ),
            Target::LeafCheckbox(label) => format!(
                "//label[text()={}]/parent::a/preceding-sibling::a[contains(@id, '_check')]",
                xpath_literal(label)
            ),
            Target::Button(text) => {
                format!("//button[contains(text(), {})]", xpath_literal(text))
            }
            Target::Link { class, text } => format!(
                "//a[@class={} and text()={}]",
                xpath_literal(class),
                xpath_literal(text)
            ),
            Target::DialogLink {
                dialog_id,
                class,
                text,
            } => format!(
                "//div[@id={}]//a[@class={} and text()={}]",
                xpath_literal(dialog_id),
                xpath_literal(class),
                xpath_literal(text)
            ),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Id(id) => write!(f, "#{}", id),
            Target::GroupToggle(label) => write!(f, "toggle '{}'", label),
            Target::LeafCheckbox(label) => write!(f, "checkbox '{}'", label),
            Target::Button(text) => write!(f, "button '{}'", text),
            Target::Link { text, .. } => write!(f, "link '{}'", text),
            Target::DialogLink {
                dialog_id, text, ..
            } => write!(f, "'{}' in dialog #{}", text, dialog_id),
        }
    }
}

/// Quotes a string as an XPath 1.0 literal. XPath has no escape sequences,
/// so a value holding both quote kinds is spliced with `concat()`.
pub fn xpath_literal(value: &str) -> String {
    if !value.contains('\'') {
        format!("'{}'", value)
    } else if !value.contains('"') {
        format!("\"{}\"", value)
    } else {
        let parts: Vec<String> = value
            .split('\'')
            .map(|p| format!("'{}'", p))
            .collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

// ---------------------------------------------------------------------------
// Page abstraction
// ---------------------------------------------------------------------------

/// Opaque handle to a located control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element(pub String);

#[derive(Debug, Clone, PartialEq)]
pub enum BrowserError {
    /// Transport failure talking to the WebDriver endpoint.
    Http(String),
    /// The endpoint answered with a WebDriver error.
    Command { error: String, message: String },
    /// The session could not be created.
    Launch(String),
}

impl fmt::Display for BrowserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrowserError::Http(msg) => write!(f, "WebDriver HTTP error: {}", msg),
            BrowserError::Command { error, message } => {
                write!(f, "WebDriver command failed ({}): {}", error, message)
            }
            BrowserError::Launch(msg) => write!(f, "Browser launch failed: {}", msg),
        }
    }
}

impl std::error::Error for BrowserError {}

/// The live page inside a browser session.
///
/// Dropping the value ends the session.
pub trait Page {
    fn navigate(&mut self, url: &str) -> Result<(), BrowserError>;

    /// `Ok(None)` when nothing matches right now.
    fn find(&mut self, target: &Target) -> Result<Option<Element>, BrowserError>;

    /// Displayed and enabled.
    fn is_interactable(&mut self, element: &Element) -> Result<bool, BrowserError>;

    fn attribute(&mut self, element: &Element, name: &str)
    -> Result<Option<String>, BrowserError>;

    fn click(&mut self, element: &Element) -> Result<(), BrowserError>;

    /// Clicks through JavaScript, ignoring overlays that would intercept a
    /// native click.
    fn script_click(&mut self, element: &Element) -> Result<(), BrowserError>;

    fn clear(&mut self, element: &Element) -> Result<(), BrowserError>;

    fn type_text(&mut self, element: &Element, text: &str) -> Result<(), BrowserError>;
}

/// Starts a browser session that saves downloads into `download_dir`.
pub trait BrowserLauncher {
    fn launch(
        &self,
        download_dir: &Path,
        environment: RunEnvironment,
    ) -> Result<Box<dyn Page>, BrowserError>;
}
