//! Vocabulary IRIs used by the agents.

pub const WD: &str = "http://www.wikidata.org/entity/";

pub mod rdf {
    pub const TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
}

pub mod rdfs {
    pub const LABEL: &str = "http://www.w3.org/2000/01/rdf-schema#label";
    pub const SUB_CLASS_OF: &str = "http://www.w3.org/2000/01/rdf-schema#subClassOf";
}

pub mod xsd {
    pub const DATE_TIME: &str = "http://www.w3.org/2001/XMLSchema#dateTime";
}

pub mod schema {
    pub const ABOUT: &str = "http://schema.org/about";
    pub const CAPTION: &str = "http://schema.org/caption";
    pub const DESCRIPTION: &str = "http://schema.org/description";
    pub const IMAGE_OBJECT: &str = "http://schema.org/ImageObject";
    pub const MEDIA_OBJECT: &str = "http://schema.org/MediaObject";
    pub const TEXT: &str = "http://schema.org/text";
}

pub mod skos {
    pub const CONCEPT: &str = "http://www.w3.org/2004/02/skos/core#Concept";
}

pub mod prov {
    pub const USED: &str = "http://www.w3.org/ns/prov#used";
    pub const STARTED_AT_TIME: &str = "http://www.w3.org/ns/prov#startedAtTime";
    pub const ENDED_AT_TIME: &str = "http://www.w3.org/ns/prov#endedAtTime";
    pub const WAS_GENERATED_BY: &str = "http://www.w3.org/ns/prov#wasGeneratedBy";
}

pub mod whyis {
    pub const HAS_FILE_ID: &str = "http://vocab.rpi.edu/whyis/hasFileID";
    pub const CAPTIONED_IMAGE: &str = "http://vocab.rpi.edu/whyis/CaptionedImage";
    pub const KNOWLEDGE_EXTRACTED_MEDIA: &str = "http://vocab.rpi.edu/whyis/KnowledgeExtractedMedia";
}

/// Wikidata entity IRI for a `Q` identifier.
pub fn wd(id: &str) -> String {
    format!("{}{}", WD, id)
}

/// Join a namespace and a local name, inserting a `/` when the namespace
/// has no trailing separator.
pub fn join(namespace: &str, local: &str) -> String {
    if namespace.ends_with('/') || namespace.ends_with('#') {
        format!("{}{}", namespace, local)
    } else {
        format!("{}/{}", namespace, local)
    }
}

/// Turn a free-text label into something usable as the last IRI segment.
/// Spaces become underscores; characters that may not appear in an IRI are
/// percent-encoded.
pub fn local_name(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for c in label.replace(' ', "_").chars() {
        match c {
            c if matches!(c, '<' | '>' | '"' | '{' | '}' | '|' | '^' | '`' | '\\' | '%')
                || c.is_control()
                || c.is_whitespace() =>
            {
                let mut buf = [0u8; 4];
                for b in c.encode_utf8(&mut buf).bytes() {
                    out.push_str(&format!("%{:02X}", b));
                }
            }
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_inserts_separator() {
        assert_eq!(join("http://example.org/entity/", "abc"), "http://example.org/entity/abc");
        assert_eq!(join("http://example.org/entity", "abc"), "http://example.org/entity/abc");
        assert_eq!(join("http://example.org/ns#", "abc"), "http://example.org/ns#abc");
    }

    #[test]
    fn test_local_name_replaces_spaces() {
        assert_eq!(local_name("country of citizenship"), "country_of_citizenship");
        assert_eq!(local_name("a<b>"), "a%3Cb%3E");
        assert_eq!(local_name("tab\there"), "tab%09here");
        assert_eq!(local_name("50%|café"), "50%25%7Ccafé");
        assert_eq!(local_name("no\u{a0}break"), "no%C2%A0break");
    }

    #[test]
    fn test_wikidata_iri() {
        assert_eq!(wd("Q215627"), "http://www.wikidata.org/entity/Q215627");
    }
}
