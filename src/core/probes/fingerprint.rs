// src/core/probes/fingerprint.rs

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderMap, SET_COOKIE};
use scraper::{Html, Selector};
use serde::Serialize;
use tracing::debug;

/// A technology identified on a web page.
#[derive(Debug, Clone, Serialize, PartialEq, Eq, Hash)]
pub struct Technology {
    pub name: String,
    pub category: String,
    pub version: Option<String>,
}

/// Where in the HTTP response a signature is looked for.
enum Source {
    Header(&'static str),
    Cookies,
    Body,
    Meta(&'static str),
    ScriptSrc,
    LinkHref,
}

/// A pattern that identifies one technology. The first capture group, if any, is the version.
struct Signature {
    tech: &'static str,
    category: &'static str,
    source: Source,
    pattern: &'static Lazy<Regex>,
}

macro_rules! pattern {
    ($name:ident, $re:expr) => {
        static $name: Lazy<Regex> = Lazy::new(|| Regex::new($re).unwrap());
    };
}

pattern!(NGINX, r"(?i)nginx(?:/([\d.]+))?");
pattern!(APACHE, r"Apache(?:/([\d.]+))?");
pattern!(IIS, r"Microsoft-IIS/([\d.]+)");
pattern!(CLOUDFLARE, r"(?i)cloudflare");
pattern!(LITESPEED, r"LiteSpeed");
pattern!(PHP, r"PHP/?([\d.]+)?");
pattern!(PHP_SESSION, r"PHPSESSID");
pattern!(ASPNET, r"ASP\.NET|ASPXAUTH");
pattern!(JAVA_SESSION, r"JSESSIONID");
pattern!(DJANGO, r"csrftoken");
pattern!(RAILS, r"_rails_session|_session_id");
pattern!(EXPRESS, r"Express");
pattern!(WORDPRESS_META, r"WordPress ?([\d.]+)?");
pattern!(WORDPRESS_PATHS, r"/wp-content/|/wp-includes/");
pattern!(JOOMLA, r"Joomla!?");
pattern!(DRUPAL, r"Drupal ?([\d.]+)?");
pattern!(SHOPIFY, r"cdn\.shopify\.com");
pattern!(NEXTJS, r"/_next/static/");
pattern!(NUXT, r"__NUXT__|/_nuxt/");
pattern!(ANGULAR, r#"ng-version="([\d.]+)""#);
pattern!(REACT, r"data-reactroot|react-dom");
pattern!(VUE, r"data-v-app|__VUE__");
pattern!(JQUERY, r"jquery[.-]?([\d.]+\d)?(?:\.min)?\.js");
pattern!(BOOTSTRAP, r"bootstrap(?:@([\d.]+))?[^\s]*\.css");
pattern!(GOOGLE_ANALYTICS, r"google-analytics\.com|googletagmanager\.com");

static SIGNATURES: &[Signature] = &[
    Signature { tech: "Nginx", category: "Web Server", source: Source::Header("server"), pattern: &NGINX },
    Signature { tech: "Apache", category: "Web Server", source: Source::Header("server"), pattern: &APACHE },
    Signature { tech: "IIS", category: "Web Server", source: Source::Header("server"), pattern: &IIS },
    Signature { tech: "LiteSpeed", category: "Web Server", source: Source::Header("server"), pattern: &LITESPEED },
    Signature { tech: "Cloudflare", category: "CDN / WAF", source: Source::Header("server"), pattern: &CLOUDFLARE },
    Signature { tech: "PHP", category: "Language", source: Source::Header("x-powered-by"), pattern: &PHP },
    Signature { tech: "PHP", category: "Language", source: Source::Cookies, pattern: &PHP_SESSION },
    Signature { tech: "ASP.NET", category: "Framework", source: Source::Header("x-powered-by"), pattern: &ASPNET },
    Signature { tech: "ASP.NET", category: "Framework", source: Source::Cookies, pattern: &ASPNET },
    Signature { tech: "Express", category: "Framework", source: Source::Header("x-powered-by"), pattern: &EXPRESS },
    Signature { tech: "Java", category: "Language", source: Source::Cookies, pattern: &JAVA_SESSION },
    Signature { tech: "Django", category: "Framework", source: Source::Cookies, pattern: &DJANGO },
    Signature { tech: "Ruby on Rails", category: "Framework", source: Source::Cookies, pattern: &RAILS },
    Signature { tech: "WordPress", category: "CMS", source: Source::Meta("generator"), pattern: &WORDPRESS_META },
    Signature { tech: "WordPress", category: "CMS", source: Source::Body, pattern: &WORDPRESS_PATHS },
    Signature { tech: "Joomla", category: "CMS", source: Source::Meta("generator"), pattern: &JOOMLA },
    Signature { tech: "Drupal", category: "CMS", source: Source::Meta("generator"), pattern: &DRUPAL },
    Signature { tech: "Shopify", category: "E-commerce", source: Source::Body, pattern: &SHOPIFY },
    Signature { tech: "Next.js", category: "JS Framework", source: Source::ScriptSrc, pattern: &NEXTJS },
    Signature { tech: "Nuxt.js", category: "JS Framework", source: Source::Body, pattern: &NUXT },
    Signature { tech: "Angular", category: "JS Framework", source: Source::Body, pattern: &ANGULAR },
    Signature { tech: "React", category: "JS Library", source: Source::Body, pattern: &REACT },
    Signature { tech: "Vue.js", category: "JS Library", source: Source::Body, pattern: &VUE },
    Signature { tech: "jQuery", category: "JS Library", source: Source::ScriptSrc, pattern: &JQUERY },
    Signature { tech: "Bootstrap", category: "UI Framework", source: Source::LinkHref, pattern: &BOOTSTRAP },
    Signature { tech: "Google Analytics", category: "Analytics", source: Source::ScriptSrc, pattern: &GOOGLE_ANALYTICS },
];

/// Applies every signature to one HTTP response. Technologies come back in signature
/// order, once each, with the first version any signature captured.
pub fn detect(headers: &HeaderMap, body: &str) -> Vec<Technology> {
    let cookies = headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect::<Vec<_>>()
        .join("; ");
    let document = Html::parse_document(body);

    let mut found: IndexMap<&'static str, Technology> = IndexMap::new();
    for signature in SIGNATURES {
        let hit = match &signature.source {
            Source::Header(name) => match_text(headers.get(*name).and_then(|v| v.to_str().ok()), signature.pattern),
            Source::Cookies => match_text(Some(&cookies), signature.pattern),
            Source::Body => match_text(Some(body), signature.pattern),
            Source::Meta(name) => match_meta(&document, name, signature.pattern),
            Source::ScriptSrc => match_attribute(&document, "script[src]", "src", signature.pattern),
            Source::LinkHref => match_attribute(&document, "link[href]", "href", signature.pattern),
        };

        let Some(version) = hit else { continue };
        debug!(tech = signature.tech, version = ?version, "Signature matched.");
        let entry = found.entry(signature.tech).or_insert_with(|| Technology {
            name: signature.tech.to_string(),
            category: signature.category.to_string(),
            version: None,
        });
        if entry.version.is_none() {
            entry.version = version;
        }
    }

    found.into_values().collect()
}

/// `None` when the pattern does not match; `Some(version)` when it does, where the
/// version is the first non-empty capture group.
fn match_text(text: Option<&str>, re: &Regex) -> Option<Option<String>> {
    let caps = re.captures(text?)?;
    Some(caps.get(1).map(|m| m.as_str().to_string()).filter(|s| !s.is_empty()))
}

fn match_meta(document: &Html, name: &str, re: &Regex) -> Option<Option<String>> {
    let selector = Selector::parse(&format!("meta[name='{}']", name)).ok()?;
    document
        .select(&selector)
        .filter_map(|el| el.value().attr("content"))
        .find_map(|content| match_text(Some(content), re))
}

fn match_attribute(document: &Html, css: &str, attr: &str, re: &Regex) -> Option<Option<String>> {
    let selector = Selector::parse(css).ok()?;
    document
        .select(&selector)
        .filter_map(|el| el.value().attr(attr))
        .find_map(|value| match_text(Some(value), re))
}
