//! Track metadata tags.

use std::fmt;

use crate::backend::codec::Dictionary;

/// Tag kinds a player can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaTag {
    Title,
    Artist,
    Album,
    Copyright,
}

impl MetaTag {
    pub const ALL: [MetaTag; 4] = [
        MetaTag::Title,
        MetaTag::Artist,
        MetaTag::Album,
        MetaTag::Copyright,
    ];

    fn index(self) -> usize {
        match self {
            MetaTag::Title => 0,
            MetaTag::Artist => 1,
            MetaTag::Album => 2,
            MetaTag::Copyright => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MetaTag::Title => "title",
            MetaTag::Artist => "artist",
            MetaTag::Album => "album",
            MetaTag::Copyright => "copyright",
        }
    }
}

impl fmt::Display for MetaTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Tag values of one player; unset tags read as `None`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetaTagSet {
    values: [Option<String>; 4],
}

impl MetaTagSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract title, artist (or author), album and copyright from
    /// container metadata. Keys match case-sensitively.
    pub fn from_dictionary(dict: &Dictionary) -> Self {
        let mut tags = MetaTagSet::new();
        if let Some(title) = dict.get("title") {
            tags.set(MetaTag::Title, title);
        }
        if let Some(artist) = dict.get("artist").or_else(|| dict.get("author")) {
            tags.set(MetaTag::Artist, artist);
        }
        if let Some(album) = dict.get("album") {
            tags.set(MetaTag::Album, album);
        }
        if let Some(copyright) = dict.get("copyright") {
            tags.set(MetaTag::Copyright, copyright);
        }
        tags
    }

    pub fn set(&mut self, tag: MetaTag, value: &str) {
        self.values[tag.index()] = Some(value.to_string());
    }

    pub fn get(&self, tag: MetaTag) -> Option<&str> {
        self.values[tag.index()].as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.values.iter().all(Option::is_none)
    }

    pub fn clear(&mut self) {
        self.values = Default::default();
    }
}
