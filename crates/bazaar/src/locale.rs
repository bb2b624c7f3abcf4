//! Locale-aware resolution of multi-language package metadata.
//!
//! Package descriptors carry display names, descriptions and readme paths
//! as a `default` string plus optional per-locale overrides. Every field is
//! resolved through [`resolve`], which walks a fixed fallback chain:
//!
//! 1. the active locale's override, when recognized and non-empty;
//! 2. for an unrecognized active locale, the `en_US` override;
//! 3. the `default` value;
//! 4. a literal supplied by the call site.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Readme filename used when a package names none.
pub const DEFAULT_README: &str = "README.md";

/// Locales with dedicated overrides in package descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Locale {
    ArSa,
    DeDe,
    EnUs,
    EsEs,
    FrFr,
    HeIl,
    ItIt,
    JaJp,
    PlPl,
    PtBr,
    RuRu,
    ZhCht,
    ZhCn,
}

impl Locale {
    /// Every recognized locale, in descriptor field order.
    pub const ALL: [Locale; 13] = [
        Locale::ArSa,
        Locale::DeDe,
        Locale::EnUs,
        Locale::EsEs,
        Locale::FrFr,
        Locale::HeIl,
        Locale::ItIt,
        Locale::JaJp,
        Locale::PlPl,
        Locale::PtBr,
        Locale::RuRu,
        Locale::ZhCht,
        Locale::ZhCn,
    ];

    /// The descriptor key for this locale, e.g. `zh_CN`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ArSa => "ar_SA",
            Self::DeDe => "de_DE",
            Self::EnUs => "en_US",
            Self::EsEs => "es_ES",
            Self::FrFr => "fr_FR",
            Self::HeIl => "he_IL",
            Self::ItIt => "it_IT",
            Self::JaJp => "ja_JP",
            Self::PlPl => "pl_PL",
            Self::PtBr => "pt_BR",
            Self::RuRu => "ru_RU",
            Self::ZhCht => "zh_CHT",
            Self::ZhCn => "zh_CN",
        }
    }

    /// Parse a locale code, returning `None` for unrecognized codes.
    pub fn parse(code: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|l| l.code() == code)
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Locale {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unrecognized locale: {}", s))
    }
}

/// A text field with a default value and per-locale overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalizedText {
    pub default: String,
    #[serde(rename = "ar_SA")]
    pub ar_sa: String,
    #[serde(rename = "de_DE")]
    pub de_de: String,
    #[serde(rename = "en_US")]
    pub en_us: String,
    #[serde(rename = "es_ES")]
    pub es_es: String,
    #[serde(rename = "fr_FR")]
    pub fr_fr: String,
    #[serde(rename = "he_IL")]
    pub he_il: String,
    #[serde(rename = "it_IT")]
    pub it_it: String,
    #[serde(rename = "ja_JP")]
    pub ja_jp: String,
    #[serde(rename = "pl_PL")]
    pub pl_pl: String,
    #[serde(rename = "pt_BR")]
    pub pt_br: String,
    #[serde(rename = "ru_RU")]
    pub ru_ru: String,
    #[serde(rename = "zh_CHT")]
    pub zh_cht: String,
    #[serde(rename = "zh_CN")]
    pub zh_cn: String,
}

impl LocalizedText {
    /// A field with only the default value set.
    pub fn with_default(default: impl Into<String>) -> Self {
        Self {
            default: default.into(),
            ..Self::default()
        }
    }

    /// Builder-style setter for one locale override.
    pub fn with(mut self, locale: Locale, value: impl Into<String>) -> Self {
        *self.slot_mut(locale) = value.into();
        self
    }

    /// The override for `locale` (possibly empty).
    pub fn get(&self, locale: Locale) -> &str {
        match locale {
            Locale::ArSa => &self.ar_sa,
            Locale::DeDe => &self.de_de,
            Locale::EnUs => &self.en_us,
            Locale::EsEs => &self.es_es,
            Locale::FrFr => &self.fr_fr,
            Locale::HeIl => &self.he_il,
            Locale::ItIt => &self.it_it,
            Locale::JaJp => &self.ja_jp,
            Locale::PlPl => &self.pl_pl,
            Locale::PtBr => &self.pt_br,
            Locale::RuRu => &self.ru_ru,
            Locale::ZhCht => &self.zh_cht,
            Locale::ZhCn => &self.zh_cn,
        }
    }

    fn slot_mut(&mut self, locale: Locale) -> &mut String {
        match locale {
            Locale::ArSa => &mut self.ar_sa,
            Locale::DeDe => &mut self.de_de,
            Locale::EnUs => &mut self.en_us,
            Locale::EsEs => &mut self.es_es,
            Locale::FrFr => &mut self.fr_fr,
            Locale::HeIl => &mut self.he_il,
            Locale::ItIt => &mut self.it_it,
            Locale::JaJp => &mut self.ja_jp,
            Locale::PlPl => &mut self.pl_pl,
            Locale::PtBr => &mut self.pt_br,
            Locale::RuRu => &mut self.ru_ru,
            Locale::ZhCht => &mut self.zh_cht,
            Locale::ZhCn => &mut self.zh_cn,
        }
    }

    /// True when neither the default nor any override is set.
    pub fn is_empty(&self) -> bool {
        self.default.is_empty() && Locale::ALL.iter().all(|l| self.get(*l).is_empty())
    }
}

/// Resolve a localized field for the active locale.
///
/// `active` is `None` when the process locale is not one of [`Locale::ALL`];
/// in that case the `en_US` override is preferred over the default. An absent
/// field resolves straight to `literal_fallback`.
pub fn resolve(
    field: Option<&LocalizedText>,
    active: Option<Locale>,
    literal_fallback: &str,
) -> String {
    let Some(field) = field else {
        return literal_fallback.to_string();
    };

    let preferred = active.unwrap_or(Locale::EnUs);
    let mut ret = field.default.as_str();
    let candidate = field.get(preferred);
    if !candidate.is_empty() {
        ret = candidate;
    }

    if ret.is_empty() {
        literal_fallback.to_string()
    } else {
        ret.to_string()
    }
}

/// Display name, falling back to the package's bare name.
pub fn preferred_name(field: Option<&LocalizedText>, active: Option<Locale>, name: &str) -> String {
    resolve(field, active, name)
}

/// Description, falling back to the `en_US` override (or empty).
pub fn preferred_description(field: Option<&LocalizedText>, active: Option<Locale>) -> String {
    let fallback = field.map(|f| f.en_us.as_str()).unwrap_or_default();
    resolve(field, active, fallback)
}

/// Readme path, falling back to [`DEFAULT_README`].
pub fn preferred_readme(field: Option<&LocalizedText>, active: Option<Locale>) -> String {
    resolve(field, active, DEFAULT_README)
}

/// Funding links declared by a package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Funding {
    pub open_collective: String,
    pub patreon: String,
    pub github: String,
    pub custom: Vec<String>,
}

impl Funding {
    /// The single funding URL to show, by provider priority.
    ///
    /// OpenCollective, then Patreon, then GitHub Sponsors, then the first
    /// custom URL (used verbatim). Empty when nothing is set.
    pub fn preferred_url(&self) -> String {
        if !self.open_collective.is_empty() {
            return format!("https://opencollective.com/{}", self.open_collective);
        }
        if !self.patreon.is_empty() {
            return format!("https://www.patreon.com/{}", self.patreon);
        }
        if !self.github.is_empty() {
            return format!("https://github.com/sponsors/{}", self.github);
        }
        self.custom.first().cloned().unwrap_or_default()
    }
}

/// Funding URL for an optional funding record.
pub fn preferred_funding(funding: Option<&Funding>) -> String {
    funding.map(Funding::preferred_url).unwrap_or_default()
}
