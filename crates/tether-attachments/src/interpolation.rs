//! Path/URL Interpolation
//!
//! Replaces `:token` markers in path and URL templates. Unknown tokens are
//! left in place so templates can reference tokens registered later.
//!
//! Built-in tokens: `:root`, `:class`, `:id`, `:id_partition`,
//! `:attachment`, `:style`, `:basename`, `:extension`, `:filename`,
//! `:timestamp`, `:fingerprint`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;
use regex::{Captures, Regex};
use tether_core::{pluralize, RecordKey};

use crate::model::AttachmentMetadata;
use crate::style::StyleDefinition;

static TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r":([a-z_][a-z0-9_]*)").unwrap());

/// Runs of slashes not preceded by a scheme colon
static REPEATED_SLASHES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(^|[^:])/{2,}").unwrap());

const BUILTIN_TOKENS: [&str; 11] = [
    "root",
    "class",
    "id",
    "id_partition",
    "attachment",
    "style",
    "basename",
    "extension",
    "filename",
    "timestamp",
    "fingerprint",
];

/// Everything a token may depend on
#[derive(Debug, Clone, Copy)]
pub struct InterpolationContext<'a> {
    pub record: &'a RecordKey,
    pub attachment: &'a str,
    pub style: &'a StyleDefinition,
    pub default_style: &'a str,
    /// Render `:style` empty for the default style
    pub omit_default_style: bool,
    pub metadata: &'a AttachmentMetadata,
}

/// Renders a custom token
pub type TokenFn = Arc<dyn Fn(&InterpolationContext<'_>) -> String + Send + Sync>;

/// Template renderer shared by every attachment of a runtime
pub struct Interpolator {
    root: RwLock<PathBuf>,
    custom: RwLock<HashMap<String, TokenFn>>,
}

impl Interpolator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: RwLock::new(root.into()),
            custom: RwLock::new(HashMap::new()),
        }
    }

    /// Value of `:root` for every later interpolation
    pub fn set_root(&self, root: impl Into<PathBuf>) {
        *self.root.write() = root.into();
    }

    pub fn root(&self) -> PathBuf {
        self.root.read().clone()
    }

    /// Register a custom token. Tokens are lowercase identifiers; a custom
    /// token shadows a built-in of the same name.
    pub fn register<F>(&self, name: impl Into<String>, token: F)
    where
        F: Fn(&InterpolationContext<'_>) -> String + Send + Sync + 'static,
    {
        self.custom.write().insert(name.into(), Arc::new(token));
    }

    pub fn interpolate(&self, template: &str, ctx: &InterpolationContext<'_>) -> String {
        let custom = self.custom.read();
        let root = self.root.read();

        let rendered = TOKEN.replace_all(template, |caps: &Captures<'_>| {
            let word = &caps[1];
            // `:id_partition` must not read as `:id` + `_partition`, but
            // `:id_thumb` still renders `:id` followed by `_thumb`
            match longest_token(word, &custom) {
                Some(token) => {
                    let value = custom
                        .get(token)
                        .map(|f| (**f)(ctx))
                        .or_else(|| builtin(token, ctx, &root))
                        .unwrap_or_default();
                    format!("{}{}", value, &word[token.len()..])
                }
                None => caps[0].to_string(),
            }
        });

        REPEATED_SLASHES
            .replace_all(&rendered, "${1}/")
            .into_owned()
    }
}

impl Default for Interpolator {
    fn default() -> Self {
        Self::new(".")
    }
}

fn longest_token<'w>(word: &'w str, custom: &HashMap<String, TokenFn>) -> Option<&'w str> {
    (1..=word.len())
        .rev()
        .filter(|&end| word.is_char_boundary(end))
        .map(|end| &word[..end])
        .find(|candidate| {
            custom.contains_key(*candidate) || BUILTIN_TOKENS.iter().any(|t| t == candidate)
        })
}

fn builtin(token: &str, ctx: &InterpolationContext<'_>, root: &Path) -> Option<String> {
    let value = match token {
        "root" => root.to_string_lossy().into_owned(),
        "class" => ctx.record.table_name(),
        "id" => ctx.record.id.map(|id| id.to_string()).unwrap_or_default(),
        "id_partition" => ctx.record.id.map(id_partition).unwrap_or_default(),
        "attachment" => pluralize(ctx.attachment),
        "style" => {
            if ctx.omit_default_style && ctx.style.name == ctx.default_style {
                String::new()
            } else {
                ctx.style.name.clone()
            }
        }
        "basename" => ctx.metadata.basename().to_string(),
        "extension" => extension(ctx).to_string(),
        "filename" => {
            let extension = extension(ctx);
            if extension.is_empty() {
                ctx.metadata.basename().to_string()
            } else {
                format!("{}.{}", ctx.metadata.basename(), extension)
            }
        }
        "timestamp" => ctx
            .metadata
            .updated_at
            .map(|t| t.timestamp().to_string())
            .unwrap_or_default(),
        "fingerprint" => ctx.metadata.fingerprint.clone().unwrap_or_default(),
        _ => return None,
    };
    Some(value)
}

/// Style format wins over the stored file's extension
fn extension<'a>(ctx: &InterpolationContext<'a>) -> &'a str {
    match ctx.style.format.as_deref() {
        Some(format) => format,
        None => ctx.metadata.extension(),
    }
}

/// `42` -> `000/000/042`
fn id_partition(id: i64) -> String {
    let padded = format!("{:09}", id);
    padded
        .as_bytes()
        .chunks(3)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
