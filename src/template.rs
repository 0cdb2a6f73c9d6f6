//! # Placeholder substitution inside process configs.
//!
//! Two token forms are resolved, in two fixed passes:
//!
//! 1. `{name}` / `{name,arg1=val1,arg2=val2}`: `name` is either a built-in
//!    placeholder (`processid`, `reference`, `inputid`, `outputid`) or a
//!    host-registered template function. A function returns a template
//!    string that may contain `{argN}` markers, which are filled from the
//!    caller-supplied arguments merged over the function's defaults.
//! 2. `$processid`, `$reference`, `$inputid`, `$outputid` expand to the
//!    fixed fields of the config being resolved.
//!
//! The passes are not recursive: template output is never rescanned for
//! `{…}` tokens. Unknown `{name}` tokens are left as literals; the registry
//! rejects addresses that still carry any after resolution.

use std::collections::HashMap;
use std::sync::Arc;

use crate::process::ProcessConfig;

/// Config section a token is being resolved in, so template functions can
/// emit section-specific variants (e.g. publisher vs. subscriber endpoints).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Global,
    Input,
    Output,
}

impl Section {
    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Global => "global",
            Section::Input => "input",
            Section::Output => "output",
        }
    }
}

/// A registered template function: renders a template string for the given
/// config and section.
pub type TemplateFn = Arc<dyn Fn(&ProcessConfig, Section) -> String + Send + Sync>;

#[derive(Clone)]
struct Template {
    render: TemplateFn,
    defaults: HashMap<String, String>,
}

/// Fixed fields available to built-in placeholders and `$variable` tokens.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Vars<'a> {
    pub process_id: &'a str,
    pub reference: &'a str,
    pub input_id: Option<&'a str>,
    pub output_id: Option<&'a str>,
}

/// Host-extensible table of template functions.
#[derive(Clone, Default)]
pub struct Replacer {
    templates: HashMap<String, Template>,
}

impl Replacer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a template function under `name`, with default argument
    /// values for its `{argN}` markers.
    pub fn register_template<F>(&mut self, name: &str, func: F, defaults: &[(&str, &str)])
    where
        F: Fn(&ProcessConfig, Section) -> String + Send + Sync + 'static,
    {
        self.templates.insert(
            name.to_string(),
            Template {
                render: Arc::new(func),
                defaults: defaults
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            },
        );
    }

    /// Resolves all placeholders in `text` for the given config and section.
    pub(crate) fn resolve(
        &self,
        text: &str,
        cfg: &ProcessConfig,
        section: Section,
        vars: &Vars<'_>,
    ) -> String {
        let resolved = self.resolve_braces(text, cfg, section, vars);
        resolve_dollar_vars(&resolved, vars)
    }

    fn resolve_braces(
        &self,
        text: &str,
        cfg: &ProcessConfig,
        section: Section,
        vars: &Vars<'_>,
    ) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(open) = rest.find('{') {
            let Some(close) = rest[open..].find('}') else {
                break;
            };
            let close = open + close;

            out.push_str(&rest[..open]);
            let inner = &rest[open + 1..close];

            match self.expand(inner, cfg, section, vars) {
                Some(expansion) => out.push_str(&expansion),
                // Unknown name: keep the token as a literal.
                None => {
                    out.push('{');
                    out.push_str(inner);
                    out.push('}');
                }
            }

            rest = &rest[close + 1..];
        }

        out.push_str(rest);
        out
    }

    fn expand(
        &self,
        inner: &str,
        cfg: &ProcessConfig,
        section: Section,
        vars: &Vars<'_>,
    ) -> Option<String> {
        let (name, args) = match inner.split_once(',') {
            Some((name, args)) => (name, Some(args)),
            None => (inner, None),
        };

        match name {
            "processid" => return Some(vars.process_id.to_string()),
            "reference" => return Some(vars.reference.to_string()),
            "inputid" => return vars.input_id.map(str::to_string),
            "outputid" => return vars.output_id.map(str::to_string),
            _ => {}
        }

        let template = self.templates.get(name)?;
        let mut rendered = (template.render)(cfg, section);

        let mut merged = template.defaults.clone();
        if let Some(args) = args {
            for arg in args.split(',') {
                if let Some((k, v)) = arg.split_once('=') {
                    merged.insert(k.to_string(), v.to_string());
                }
            }
        }

        for (k, v) in &merged {
            rendered = rendered.replace(&format!("{{{k}}}"), v);
        }

        Some(rendered)
    }
}

fn resolve_dollar_vars(text: &str, vars: &Vars<'_>) -> String {
    let mut out = text.replace("$processid", vars.process_id);
    out = out.replace("$reference", vars.reference);
    if let Some(id) = vars.input_id {
        out = out.replace("$inputid", id);
    }
    if let Some(id) = vars.output_id {
        out = out.replace("$outputid", id);
    }
    out
}

/// Returns the first unresolved `{…}` token left in `text`, if any.
pub(crate) fn unresolved_placeholder(text: &str) -> Option<&str> {
    let open = text.find('{')?;
    let close = text[open..].find('}')?;
    Some(&text[open..=open + close])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars<'a>() -> Vars<'a> {
        Vars {
            process_id: "314159265359",
            reference: "refref",
            input_id: Some("in_1"),
            output_id: None,
        }
    }

    #[test]
    fn builtin_placeholders() {
        let r = Replacer::new();
        let cfg = ProcessConfig::default();

        let out = r.resolve(
            "id:{processid} ref:{reference} in:{inputid}",
            &cfg,
            Section::Input,
            &vars(),
        );
        assert_eq!(out, "id:314159265359 ref:refref in:in_1");
    }

    #[test]
    fn registered_template_with_args_and_defaults() {
        let mut r = Replacer::new();
        r.register_template(
            "srt",
            |_cfg, section| {
                let mode = if section == Section::Output {
                    "publish"
                } else {
                    "request"
                };
                format!("srt://localhost:6000?latency={{latency}}&streamid={{name}},mode:{mode}")
            },
            &[("latency", "20000")],
        );

        let cfg = ProcessConfig::default();
        let out = r.resolve("{srt,name=trs}", &cfg, Section::Input, &vars());
        assert_eq!(
            out,
            "srt://localhost:6000?latency=20000&streamid=trs,mode:request"
        );

        let out = r.resolve("{srt,name=pub,latency=42}", &cfg, Section::Output, &vars());
        assert_eq!(out, "srt://localhost:6000?latency=42&streamid=pub,mode:publish");
    }

    #[test]
    fn dollar_vars_resolve_after_template_pass() {
        let mut r = Replacer::new();
        r.register_template("rtmp", |_, _| "rtmp://localhost/app/{name}".to_string(), &[]);

        let cfg = ProcessConfig::default();
        let out = r.resolve("{rtmp,name=$inputid}", &cfg, Section::Input, &vars());
        assert_eq!(out, "rtmp://localhost/app/in_1");
    }

    #[test]
    fn unknown_names_stay_literal() {
        let r = Replacer::new();
        let cfg = ProcessConfig::default();

        let out = r.resolve("{memfs}/file.txt", &cfg, Section::Global, &vars());
        assert_eq!(out, "{memfs}/file.txt");
        assert_eq!(unresolved_placeholder(&out), Some("{memfs}"));
        assert_eq!(unresolved_placeholder("plain"), None);
    }

    #[test]
    fn identity_text_round_trips() {
        let r = Replacer::new();
        let cfg = ProcessConfig::default();

        let text = "rtmp://example.com/live/stream?token=abc";
        assert_eq!(r.resolve(text, &cfg, Section::Input, &vars()), text);
    }
}
