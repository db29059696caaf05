//! Login form scraping.
//!
//! The portal has shipped three login page generations; all are recognised by
//! their form ids. Extraction is deliberately regex-based and best-effort:
//! the schemas are superficially similar, so an unrecognised page still goes
//! through field harvesting and only fails when no password-bearing form can
//! be found at all.

use std::collections::HashMap;

use html_escape::decode_html_entities;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use thiserror::Error;

/// Known login form generations, by form id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormSchema {
    /// `id="casLoginForm"` — the classic authserver page.
    CasLoginForm,
    /// `id="loginFromId"` — the intermediate generation.
    LoginFromId,
    /// `id="fm1"` — the oldest CAS skin.
    Fm1,
    /// None of the known ids matched; fields are harvested best-effort.
    Unknown,
}

impl FormSchema {
    pub fn id(self) -> &'static str {
        match self {
            FormSchema::CasLoginForm => "casLoginForm",
            FormSchema::LoginFromId => "loginFromId",
            FormSchema::Fm1 => "fm1",
            FormSchema::Unknown => "unknown",
        }
    }
}

/// Captcha flavour the page would serve if the portal asks for one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptchaVariant {
    /// Classic distorted-text image.
    Text,
    /// Drag-the-piece slider puzzle.
    Slider,
}

/// Everything a login attempt needs from the scraped page.
#[derive(Debug, Clone)]
pub struct LoginFormDescriptor {
    pub schema: FormSchema,
    /// Submittable field name/value pairs from the password-bearing form.
    pub fields: HashMap<String, String>,
    /// Server-supplied encryption salt, when present.
    pub salt: Option<String>,
    pub captcha: CaptchaVariant,
}

#[derive(Debug, Error)]
pub enum FormError {
    #[error("no form containing a password field was found on the login page")]
    PasswordFormMissing,
}

fn build_regex(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .unwrap_or_else(|err| panic!("invalid login form regex `{}`: {}", pattern, err))
}

static CAS_LOGIN_FORM_RE: Lazy<Regex> =
    Lazy::new(|| build_regex(r#"<form[^<]*id="casLoginForm"[^>]*>"#));
static LOGIN_FROM_ID_RE: Lazy<Regex> =
    Lazy::new(|| build_regex(r#"<form[^<]*id="loginFromId"[^>]*>"#));
static FM1_RE: Lazy<Regex> = Lazy::new(|| build_regex(r#"<form[^<]*id="fm1"[^>]*>"#));

// Forms practically never nest, so a non-greedy block match is enough.
static FORM_BLOCK_RE: Lazy<Regex> = Lazy::new(|| build_regex(r"<form[\s\S]*?</form>"));
static INPUT_TAG_RE: Lazy<Regex> = Lazy::new(|| build_regex(r"<input[\s\S]*?>"));
static PASSWORD_RE: Lazy<Regex> = Lazy::new(|| build_regex("password"));

// Input kinds that never contribute submittable text.
static NON_TEXTUAL_TYPE_RE: Lazy<Regex> =
    Lazy::new(|| build_regex(r#"type="(?:button|checkbox|file|image|radio|reset|submit)""#));

static SALT_INPUT_RE: Lazy<Regex> = Lazy::new(|| build_regex("EncryptSalt"));
static NAME_ATTR_RE: Lazy<Regex> = Lazy::new(|| build_regex(r#"name="(.*?)""#));
static VALUE_ATTR_RE: Lazy<Regex> = Lazy::new(|| build_regex(r#"value="(.*?)""#));

// Fallback: some generations park the salt in an inline script variable.
static SCRIPT_SALT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"var pwdDefaultEncryptSalt ?= ?"(.*?)""#).expect("salt regex"));

static SLIDER_MARKER_RE: Lazy<Regex> = Lazy::new(|| build_regex("sliderCaptchaDiv"));

fn detect_schema(html: &str) -> FormSchema {
    if CAS_LOGIN_FORM_RE.is_match(html) {
        FormSchema::CasLoginForm
    } else if LOGIN_FROM_ID_RE.is_match(html) {
        FormSchema::LoginFromId
    } else if FM1_RE.is_match(html) {
        FormSchema::Fm1
    } else {
        FormSchema::Unknown
    }
}

fn attr(regex: &Regex, tag: &str) -> Option<String> {
    regex
        .captures(tag)
        .and_then(|caps| caps.get(1))
        .map(|m| decode_html_entities(m.as_str()).into_owned())
}

/// Scrape the login page into a [`LoginFormDescriptor`].
///
/// Walks every `<form>` block, keeps the ones that mention a password field,
/// and harvests their textual inputs. A page without any password-bearing
/// form is an error; an empty field set is never submitted silently.
pub fn scrape_login_form(html: &str) -> Result<LoginFormDescriptor, FormError> {
    let schema = detect_schema(html);

    let mut fields = HashMap::new();
    let mut salt: Option<String> = None;
    let mut found_password_form = false;

    for form in FORM_BLOCK_RE.find_iter(html) {
        let form = form.as_str();
        if !PASSWORD_RE.is_match(form) {
            continue;
        }
        found_password_form = true;

        for input in INPUT_TAG_RE.find_iter(form) {
            let input = input.as_str();
            if SALT_INPUT_RE.is_match(input)
                && let Some(value) = attr(&VALUE_ATTR_RE, input)
            {
                salt = Some(value);
            }
            if NON_TEXTUAL_TYPE_RE.is_match(input) {
                continue;
            }
            let Some(name) = attr(&NAME_ATTR_RE, input) else {
                continue;
            };
            let value = attr(&VALUE_ATTR_RE, input).unwrap_or_default();
            fields.insert(name, value);
        }
    }

    if !found_password_form {
        return Err(FormError::PasswordFormMissing);
    }

    if salt.as_deref().is_none_or(str::is_empty) {
        salt = SCRIPT_SALT_RE
            .captures(html)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string());
    }

    let captcha = if SLIDER_MARKER_RE.is_match(html) {
        CaptchaVariant::Slider
    } else {
        CaptchaVariant::Text
    };

    log::debug!(
        "scraped login form: schema={}, {} field(s), salt={}, captcha={:?}",
        schema.id(),
        fields.len(),
        salt.is_some(),
        captcha
    );

    Ok(LoginFormDescriptor {
        schema,
        fields,
        salt,
        captcha,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAS_PAGE: &str = r#"
        <html><body>
        <form id="searchForm" action="/search"><input type="text" name="q" value=""/></form>
        <form id="casLoginForm" method="post" action="/authserver/login">
            <input type="text" name="username" value=""/>
            <input type="password" name="password" value=""/>
            <input type="hidden" name="lt" value="LT-12345"/>
            <input type="hidden" name="execution" value="e1s1"/>
            <input type="hidden" name="_eventId" value="submit"/>
            <input type="hidden" id="pwdEncryptSalt" name="pwdEncryptSalt" value="abc123"/>
            <input type="submit" name="login" value="Sign in"/>
            <input type="checkbox" name="rememberMe" value="on"/>
        </form>
        </body></html>
    "#;

    #[test]
    fn scrapes_cas_login_form() {
        let descriptor = scrape_login_form(CAS_PAGE).unwrap();
        assert_eq!(descriptor.schema, FormSchema::CasLoginForm);
        assert_eq!(descriptor.salt.as_deref(), Some("abc123"));
        assert_eq!(
            descriptor.fields.get("lt").map(String::as_str),
            Some("LT-12345")
        );
        assert!(descriptor.fields.contains_key("username"));
        assert!(descriptor.fields.contains_key("password"));
        // Non-textual inputs never make it into the submission set.
        assert!(!descriptor.fields.contains_key("login"));
        assert!(!descriptor.fields.contains_key("rememberMe"));
        // The stray search form contributes nothing.
        assert!(!descriptor.fields.contains_key("q"));
        assert_eq!(descriptor.captcha, CaptchaVariant::Text);
    }

    #[test]
    fn falls_back_to_script_salt() {
        let page = r#"
            <form id="fm1"><input type="password" name="password"/></form>
            <script>var pwdDefaultEncryptSalt = "scriptsalt123456";</script>
        "#;
        let descriptor = scrape_login_form(page).unwrap();
        assert_eq!(descriptor.schema, FormSchema::Fm1);
        assert_eq!(descriptor.salt.as_deref(), Some("scriptsalt123456"));
    }

    #[test]
    fn detects_slider_marker() {
        let page = r#"
            <form id="loginFromId"><input type="password" name="password"/></form>
            <div id="sliderCaptchaDiv"></div>
        "#;
        let descriptor = scrape_login_form(page).unwrap();
        assert_eq!(descriptor.schema, FormSchema::LoginFromId);
        assert_eq!(descriptor.captcha, CaptchaVariant::Slider);
    }

    #[test]
    fn unknown_schema_still_harvests_fields() {
        let page = r#"
            <form id="somethingNew">
                <input type="text" name="username"/>
                <input type="password" name="password"/>
            </form>
        "#;
        let descriptor = scrape_login_form(page).unwrap();
        assert_eq!(descriptor.schema, FormSchema::Unknown);
        assert!(descriptor.fields.contains_key("username"));
    }

    #[test]
    fn page_without_password_form_errors() {
        let page = r#"<form id="searchForm"><input type="text" name="q"/></form>"#;
        assert!(matches!(
            scrape_login_form(page),
            Err(FormError::PasswordFormMissing)
        ));
    }
}
