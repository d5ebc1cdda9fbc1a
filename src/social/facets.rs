// src/social/facets.rs
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static RE_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s<>"')\]]+"#).expect("valid regex"));

/// Rich-text annotation over a UTF-8 byte range of the post text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Facet {
    pub index: ByteSlice,
    pub features: Vec<FacetFeature>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ByteSlice {
    pub byte_start: usize,
    pub byte_end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "$type")]
pub enum FacetFeature {
    #[serde(rename = "app.bsky.richtext.facet#link")]
    Link { uri: String },
}

/// Link facets for every `http(s)://` URL, minus trailing sentence punctuation.
pub fn detect_link_facets(text: &str) -> Vec<Facet> {
    RE_URL
        .find_iter(text)
        .map(|m| {
            let url = m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?']);
            Facet {
                index: ByteSlice {
                    byte_start: m.start(),
                    byte_end: m.start() + url.len(),
                },
                features: vec![FacetFeature::Link {
                    uri: url.to_string(),
                }],
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_urls_with_byte_offsets() {
        let text = "Sources:\n1. https://a.org/x\n2. http://b.net.";
        let facets = detect_link_facets(text);
        assert_eq!(facets.len(), 2);
        let first = &facets[0];
        assert_eq!(&text[first.index.byte_start..first.index.byte_end], "https://a.org/x");
        let second = &facets[1];
        assert_eq!(&text[second.index.byte_start..second.index.byte_end], "http://b.net");
    }

    #[test]
    fn offsets_are_bytes_after_multibyte_prefix() {
        let text = "\u{2705} True\nsee https://c.io";
        let f = &detect_link_facets(text)[0];
        assert_eq!(f.index.byte_start, text.find("https").unwrap());
    }

    #[test]
    fn serializes_with_lexicon_type_tag() {
        let f = &detect_link_facets("https://d.dev")[0];
        let v = serde_json::to_value(f).unwrap();
        assert_eq!(v["features"][0]["$type"], "app.bsky.richtext.facet#link");
        assert_eq!(v["index"]["byteEnd"], 13);
    }
}
