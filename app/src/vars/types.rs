//! Type tags for variables.
//!
//! Tags carry a numeric code grouped into bands of one hundred. The tag
//! whose code is a multiple of 100 heads its band and stands for "any
//! member of this family" in [`VarType::within`].

use std::fmt;
use std::str::FromStr;

use crate::errors::VarsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VarType {
    Any,
    Bool,

    Numeric,
    Ordinal,
    Unsigned,
    Int,
    Prob,
    Float,
    Double,
    Complex,
    TensorN,

    Epoch,
    Date,
    Time,
    DateTime,

    String,
    Char,
    Token,
    Record,

    Enum,
    Color,
    Effect,
    ColorScheme,
    Encoding,
    Locale,

    Collection,
    List,
    Stack,
    Queue,
    Deque,
    Dict,
    Set,
    Tensor,
}

const ALL: &[VarType] = &[
    VarType::Any,
    VarType::Bool,
    VarType::Numeric,
    VarType::Ordinal,
    VarType::Unsigned,
    VarType::Int,
    VarType::Prob,
    VarType::Float,
    VarType::Double,
    VarType::Complex,
    VarType::TensorN,
    VarType::Epoch,
    VarType::Date,
    VarType::Time,
    VarType::DateTime,
    VarType::String,
    VarType::Char,
    VarType::Token,
    VarType::Record,
    VarType::Enum,
    VarType::Color,
    VarType::Effect,
    VarType::ColorScheme,
    VarType::Encoding,
    VarType::Locale,
    VarType::Collection,
    VarType::List,
    VarType::Stack,
    VarType::Queue,
    VarType::Deque,
    VarType::Dict,
    VarType::Set,
    VarType::Tensor,
];

impl VarType {
    pub fn code(self) -> u16 {
        match self {
            VarType::Any => 0,
            VarType::Bool => 100,
            VarType::Numeric => 200,
            VarType::Ordinal => 201,
            VarType::Unsigned => 202,
            VarType::Int => 203,
            VarType::Prob => 250,
            VarType::Float => 251,
            VarType::Double => 252,
            VarType::Complex => 253,
            VarType::TensorN => 254,
            VarType::Epoch => 300,
            VarType::Date => 301,
            VarType::Time => 302,
            VarType::DateTime => 303,
            VarType::String => 400,
            VarType::Char => 401,
            VarType::Token => 402,
            VarType::Record => 403,
            VarType::Enum => 500,
            VarType::Color => 501,
            VarType::Effect => 502,
            VarType::ColorScheme => 503,
            VarType::Encoding => 504,
            VarType::Locale => 505,
            VarType::Collection => 600,
            VarType::List => 601,
            VarType::Stack => 602,
            VarType::Queue => 603,
            VarType::Deque => 604,
            VarType::Dict => 610,
            VarType::Set => 620,
            VarType::Tensor => 630,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            VarType::Any => "any",
            VarType::Bool => "bool",
            VarType::Numeric => "numeric",
            VarType::Ordinal => "ordinal",
            VarType::Unsigned => "unsigned",
            VarType::Int => "int",
            VarType::Prob => "prob",
            VarType::Float => "float",
            VarType::Double => "double",
            VarType::Complex => "complex",
            VarType::TensorN => "tensor_n",
            VarType::Epoch => "epoch",
            VarType::Date => "date",
            VarType::Time => "time",
            VarType::DateTime => "datetime",
            VarType::String => "string",
            VarType::Char => "char",
            VarType::Token => "token",
            VarType::Record => "record",
            VarType::Enum => "enum",
            VarType::Color => "color",
            VarType::Effect => "effect",
            VarType::ColorScheme => "color_scheme",
            VarType::Encoding => "encoding",
            VarType::Locale => "locale",
            VarType::Collection => "collection",
            VarType::List => "list",
            VarType::Stack => "stack",
            VarType::Queue => "queue",
            VarType::Deque => "deque",
            VarType::Dict => "dict",
            VarType::Set => "set",
            VarType::Tensor => "tensor",
        }
    }

    /// True for the tag heading a band (code divisible by 100).
    pub fn is_band_head(self) -> bool {
        self.code() % 100 == 0
    }

    pub fn band(self) -> u16 {
        self.code() / 100
    }

    /// Whether `self` is `family` itself or, when `family` heads a band,
    /// a member of that band.
    pub fn within(self, family: VarType) -> bool {
        if self == family {
            return true;
        }
        let head = family.code();
        family.is_band_head() && head < self.code() && self.code() <= head + 99
    }

    pub fn is_collection(self) -> bool {
        self.within(VarType::Collection)
    }

    pub fn is_associative(self) -> bool {
        self == VarType::Dict
    }
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for VarType {
    type Err = VarsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ALL.iter()
            .copied()
            .find(|t| t.name() == wanted)
            .ok_or_else(|| VarsError::Unsupported(format!("unknown type `{}`", s.trim())))
    }
}

/// A declared variable type: the tag plus, for collections, the element
/// type and (dict only) the key type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeSpec {
    pub tag: VarType,
    pub key: Option<VarType>,
    pub elem: Option<VarType>,
}

impl TypeSpec {
    pub fn scalar(tag: VarType) -> Self {
        TypeSpec {
            tag,
            key: None,
            elem: None,
        }
    }

    pub fn collection(tag: VarType, elem: VarType) -> Self {
        TypeSpec {
            tag,
            key: None,
            elem: Some(elem),
        }
    }

    pub fn dict(key: VarType, elem: VarType) -> Self {
        TypeSpec {
            tag: VarType::Dict,
            key: Some(key),
            elem: Some(elem),
        }
    }

    /// Types whose content is kept as written and never refused.
    pub fn is_free_text(&self) -> bool {
        matches!(self.tag, VarType::String | VarType::Any)
    }

    /// Reject shapes the store cannot represent: parameters on scalars,
    /// keys on non-dict collections, nested aggregates.
    pub fn validate(&self) -> Result<(), VarsError> {
        let bad = |why: &str| Err(VarsError::Unsupported(format!("type `{}`: {}", self, why)));
        if !self.tag.is_collection() {
            if self.key.is_some() || self.elem.is_some() {
                return bad("only collections take element types");
            }
            return Ok(());
        }
        if self.key.is_some() && !self.tag.is_associative() {
            return bad("only dict takes a key type");
        }
        for t in self.key.iter().chain(self.elem.iter()) {
            if t.is_collection() {
                return bad("nested collections are not supported");
            }
        }
        Ok(())
    }
}

impl Default for TypeSpec {
    fn default() -> Self {
        TypeSpec::scalar(VarType::String)
    }
}

impl From<VarType> for TypeSpec {
    fn from(tag: VarType) -> Self {
        TypeSpec::scalar(tag)
    }
}

/// `list<int>`, `dict<token:float>`, `string`.
impl fmt::Display for TypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.key, self.elem) {
            (Some(k), Some(e)) => write!(f, "{}<{}:{}>", self.tag, k, e),
            (Some(k), None) => write!(f, "{}<{}:any>", self.tag, k),
            (None, Some(e)) => write!(f, "{}<{}>", self.tag, e),
            (None, None) => write!(f, "{}", self.tag),
        }
    }
}

impl FromStr for TypeSpec {
    type Err = VarsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let spec = match s.split_once('<') {
            None => TypeSpec::scalar(s.parse()?),
            Some((tag, rest)) => {
                let params = rest
                    .strip_suffix('>')
                    .ok_or_else(|| VarsError::Unsupported(format!("unterminated type `{}`", s)))?;
                let tag: VarType = tag.parse()?;
                match params.split_once(':') {
                    Some((k, e)) => TypeSpec {
                        tag,
                        key: Some(k.parse()?),
                        elem: Some(e.parse()?),
                    },
                    None => TypeSpec::collection(tag, params.parse()?),
                }
            }
        };
        spec.validate()?;
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_heads_cover_their_members() {
        assert!(VarType::Int.within(VarType::Numeric));
        assert!(VarType::Prob.within(VarType::Numeric));
        assert!(VarType::Int.within(VarType::Int));
        assert!(!VarType::Int.within(VarType::Float));
        assert!(!VarType::Date.within(VarType::Numeric));
        assert!(!VarType::Numeric.within(VarType::Int));
        assert!(VarType::Dict.is_collection());
    }

    #[test]
    fn type_spec_text_form() {
        let spec: TypeSpec = "dict<token:float>".parse().unwrap();
        assert_eq!(spec, TypeSpec::dict(VarType::Token, VarType::Float));
        assert_eq!(spec.to_string(), "dict<token:float>");

        let list: TypeSpec = " List<INT> ".parse().unwrap();
        assert_eq!(list, TypeSpec::collection(VarType::List, VarType::Int));
    }

    #[test]
    fn nested_and_malformed_specs_are_rejected() {
        assert!("list<list>".parse::<TypeSpec>().is_err());
        assert!("int<string>".parse::<TypeSpec>().is_err());
        assert!("list<int:int>".parse::<TypeSpec>().is_err());
        assert!("list<int".parse::<TypeSpec>().is_err());
        assert!("quaternion".parse::<TypeSpec>().is_err());
    }
}
