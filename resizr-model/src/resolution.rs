//! The variant tag grammar of spec.md §3/§8:
//! `thumbnail | <W>x<H> | <W>x<H>:<alias>`, plus `original` as the implicit,
//! never-stored tag for the unmodified upload.

use resizr_util::Error;

/// A parsed variant reference. `Original` and `Thumbnail` are named
/// shorthands; `Variant` carries the canonical pixel dimensions and an
/// optional second lookup key (the alias).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Original,
    Thumbnail,
    Variant {
        width: u32,
        height: u32,
        alias: Option<String>,
    },
}

/// Fallback cap on `W`/`H` when no configured bound is available (tests,
/// and `Config::max_width`/`max_height`'s own default), per spec.md §3
/// ("≈ 8192").
pub const MAX_DIMENSION: u32 = 8192;

impl Resolution {
    /// Parses a path segment or a `resolutions=` upload field into a
    /// [`Resolution`], rejecting dimensions above `max_width`/`max_height`
    /// (spec.md §10.4's configured bounds). Case-sensitive: `800X600` is
    /// rejected, matching the property in spec.md §8.
    pub fn parse(raw: &str, max_width: u32, max_height: u32) -> Result<Resolution, Error> {
        if raw == "original" {
            return Ok(Resolution::Original);
        }
        if raw == "thumbnail" {
            return Ok(Resolution::Thumbnail);
        }

        let (dims, alias) = match raw.split_once(':') {
            Some((dims, alias)) => (dims, Some(alias)),
            None => (raw, None),
        };

        let (w, h) = dims
            .split_once('x')
            .ok_or_else(|| Error::Validation(format!("invalid resolution: {:?}", raw)))?;

        if w.is_empty() || h.is_empty() {
            return Err(Error::Validation(format!("invalid resolution: {:?}", raw)));
        }
        let width: u32 = w
            .parse()
            .map_err(|_| Error::Validation(format!("invalid width in {:?}", raw)))?;
        let height: u32 = h
            .parse()
            .map_err(|_| Error::Validation(format!("invalid height in {:?}", raw)))?;

        if width == 0 || height == 0 {
            return Err(Error::Validation(format!(
                "width and height must be positive: {:?}",
                raw
            )));
        }
        if width > max_width || height > max_height {
            return Err(Error::Validation(format!(
                "resolution exceeds maximum of {}x{}: {:?}",
                max_width, max_height, raw
            )));
        }

        let alias = match alias {
            Some(a) if a.is_empty() => {
                return Err(Error::Validation(format!("empty alias in {:?}", raw)))
            }
            Some(a) => Some(a.to_string()),
            None => None,
        };

        Ok(Resolution::Variant {
            width,
            height,
            alias,
        })
    }

    /// The canonical tag as stored in `ImageRecord.resolutions` /
    /// `DedupRecord.resolution_refs`. `Original` has no stored tag (I5).
    pub fn tag(&self) -> Option<String> {
        match self {
            Resolution::Original => None,
            Resolution::Thumbnail => Some("thumbnail".to_string()),
            Resolution::Variant {
                width,
                height,
                alias: None,
            } => Some(format!("{}x{}", width, height)),
            Resolution::Variant {
                width,
                height,
                alias: Some(a),
            } => Some(format!("{}x{}:{}", width, height, a)),
        }
    }

    /// Dimensions used for storage-key derivation and resizing. `Thumbnail`
    /// needs the configured thumbnail box; `Original` has none (no
    /// rendering is ever performed for it).
    pub fn dimensions(&self, thumbnail_size: u32) -> Option<(u32, u32)> {
        match self {
            Resolution::Original => None,
            Resolution::Thumbnail => Some((thumbnail_size, thumbnail_size)),
            Resolution::Variant { width, height, .. } => Some((*width, *height)),
        }
    }

    /// The dimension-only tag used to build the storage key
    /// (`images/<owner>/<WxH>.<ext>`); aliases never affect storage keys.
    pub fn dimension_tag(&self, thumbnail_size: u32) -> Option<String> {
        self.dimensions(thumbnail_size)
            .map(|(w, h)| format!("{}x{}", w, h))
    }

    /// Resolves a bare alias (the `:resolution` path segment did not parse
    /// as grammar) against a record's already-rendered tags (§4.4 step 1,
    /// "alias-only lookup"). Returns `None` if no rendered tag carries this
    /// alias. `tag` was already bounds-checked when it was first rendered,
    /// so this re-parse uses the unbounded maximum rather than requiring the
    /// caller's current config on hand.
    pub fn resolve_alias(raw: &str, resolutions: &[String]) -> Option<Resolution> {
        let suffix = format!(":{}", raw);
        let tag = resolutions.iter().find(|t| t.ends_with(&suffix))?;
        Resolution::parse(tag, u32::MAX, u32::MAX).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Result<Resolution, Error> {
        Resolution::parse(raw, MAX_DIMENSION, MAX_DIMENSION)
    }

    #[test]
    fn parses_plain_dimensions() {
        assert_eq!(
            parse("800x600").unwrap(),
            Resolution::Variant {
                width: 800,
                height: 600,
                alias: None,
            }
        );
    }

    #[test]
    fn parses_aliased_dimensions() {
        assert_eq!(
            parse("800x600:small").unwrap(),
            Resolution::Variant {
                width: 800,
                height: 600,
                alias: Some("small".to_string()),
            }
        );
    }

    #[test]
    fn rejects_uppercase_separator() {
        assert!(parse("800X600").is_err());
    }

    #[test]
    fn rejects_missing_height() {
        assert!(parse("800x").is_err());
    }

    #[test]
    fn rejects_missing_dimensions_with_alias() {
        assert!(parse(":x").is_err());
    }

    #[test]
    fn rejects_zero_and_oversized() {
        assert!(parse("0x100").is_err());
        assert!(parse("100000x100").is_err());
    }

    #[test]
    fn respects_a_narrower_configured_bound() {
        assert!(Resolution::parse("800x600", 1920, 1080).is_ok());
        assert!(Resolution::parse("800x600", 640, 480).is_err());
    }

    #[test]
    fn thumbnail_and_original_are_named() {
        assert_eq!(parse("thumbnail").unwrap(), Resolution::Thumbnail);
        assert_eq!(parse("original").unwrap(), Resolution::Original);
    }

    #[test]
    fn tag_round_trips() {
        let r = parse("800x600:small").unwrap();
        assert_eq!(r.tag().as_deref(), Some("800x600:small"));
        assert_eq!(r.dimension_tag(150).as_deref(), Some("800x600"));
    }

    #[test]
    fn resolves_alias_against_rendered_tags() {
        let rendered = vec!["thumbnail".to_string(), "800x600:small".to_string()];
        let resolved = Resolution::resolve_alias("small", &rendered).unwrap();
        assert_eq!(
            resolved,
            Resolution::Variant {
                width: 800,
                height: 600,
                alias: Some("small".to_string()),
            }
        );
        assert!(Resolution::resolve_alias("missing", &rendered).is_none());
    }
}
