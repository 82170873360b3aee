//! ABI variant detection.
//!
//! libpython has shipped several incompatible symbol sets over the years:
//!
//! - Python 2 has a separate `int` type (`PyInt_*`); Python 3 folds it
//!   into `long` (`PyLong_*`).
//! - Python 2's `str` is a byte string (`PyString_*`); Python 3 renames
//!   that type to `bytes` (`PyBytes_*`).
//! - Python 2 narrow/wide builds suffix the unicode codec functions with
//!   `UCS2`/`UCS4`.
//!
//! The rest of the crate always asks for the *canonical* name (the
//! Python 2 spelling for the first two groups, the unsuffixed spelling for
//! the codecs). [`AbiProfile::capability`] maps a canonical name to the
//! symbol that is actually exported. The profile is decided once, by
//! symbol presence only; nothing is called.

use std::collections::HashSet;
use std::ffi::c_void;

/// Anything that can answer "is this symbol exported?".
pub trait SymbolSource {
    fn has_symbol(&self, name: &str) -> bool;
}

impl SymbolSource for libloading::Library {
    fn has_symbol(&self, name: &str) -> bool {
        // SAFETY: the symbol is only looked up, never dereferenced or called.
        unsafe { self.get::<*const c_void>(name.as_bytes()).is_ok() }
    }
}

impl SymbolSource for HashSet<&str> {
    fn has_symbol(&self, name: &str) -> bool {
        self.contains(name)
    }
}

/// Internal text width of the unicode codec functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnicodeWidth {
    /// `PyUnicode_*`: Python 3, or a Python 2 build without suffixing.
    Unsuffixed,
    /// `PyUnicodeUCS4_*`: wide Python 2 build.
    Ucs4,
    /// `PyUnicodeUCS2_*`: narrow Python 2 build.
    Ucs2,
}

impl UnicodeWidth {
    const PROBE_ORDER: [UnicodeWidth; 3] = [Self::Unsuffixed, Self::Ucs4, Self::Ucs2];

    fn decode_utf8(self) -> &'static str {
        match self {
            Self::Unsuffixed => "PyUnicode_DecodeUTF8",
            Self::Ucs4 => "PyUnicodeUCS4_DecodeUTF8",
            Self::Ucs2 => "PyUnicodeUCS2_DecodeUTF8",
        }
    }

    fn as_utf8_string(self) -> &'static str {
        match self {
            Self::Unsuffixed => "PyUnicode_AsUTF8String",
            Self::Ucs4 => "PyUnicodeUCS4_AsUTF8String",
            Self::Ucs2 => "PyUnicodeUCS2_AsUTF8String",
        }
    }
}

/// Where a canonical name ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Unavailable,
    BoundAs(&'static str),
}

/// The ABI shape of one loaded libpython.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbiProfile {
    pub has_legacy_int_type: bool,
    pub uses_bytes_for_legacy_string_type: bool,
    /// Spelling of `PyUnicode_DecodeUTF8`, `None` if no variant exists.
    pub utf8_decode: Option<UnicodeWidth>,
    /// Spelling of `PyUnicode_AsUTF8String`, `None` if no variant exists.
    pub utf8_encode: Option<UnicodeWidth>,
}

impl AbiProfile {
    pub fn resolve(source: &impl SymbolSource) -> Self {
        let profile = Self {
            has_legacy_int_type: source.has_symbol("PyInt_Type"),
            uses_bytes_for_legacy_string_type: !source.has_symbol("PyString_FromStringAndSize"),
            utf8_decode: UnicodeWidth::PROBE_ORDER
                .into_iter()
                .find(|w| source.has_symbol(w.decode_utf8())),
            utf8_encode: UnicodeWidth::PROBE_ORDER
                .into_iter()
                .find(|w| source.has_symbol(w.as_utf8_string())),
        };
        log::debug!("resolved libpython ABI profile: {profile:?}");
        profile
    }

    /// Internal unicode width, as seen through the decode function.
    pub fn unicode_width(&self) -> Option<UnicodeWidth> {
        self.utf8_decode
    }

    /// Symbol to bind for a canonical name.
    pub fn capability(&self, canonical: &'static str) -> Capability {
        let legacy_int = self.has_legacy_int_type;
        let bytes = self.uses_bytes_for_legacy_string_type;
        let bound = match canonical {
            "PyInt_Type" if !legacy_int => "PyLong_Type",
            "PyInt_AsSsize_t" if !legacy_int => "PyLong_AsSsize_t",
            "PyInt_FromSsize_t" if !legacy_int => "PyLong_FromSsize_t",
            "PyString_Type" if bytes => "PyBytes_Type",
            "PyString_FromStringAndSize" if bytes => "PyBytes_FromStringAndSize",
            "PyString_AsStringAndSize" if bytes => "PyBytes_AsStringAndSize",
            "PyUnicode_DecodeUTF8" => match self.utf8_decode {
                Some(w) => w.decode_utf8(),
                None => return Capability::Unavailable,
            },
            "PyUnicode_AsUTF8String" => match self.utf8_encode {
                Some(w) => w.as_utf8_string(),
                None => return Capability::Unavailable,
            },
            other => other,
        };
        Capability::BoundAs(bound)
    }
}
