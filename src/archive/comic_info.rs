//! ComicInfo.xml metadata

use log::{debug, warn};

/// Fields shown to the reader, in display order
const DISPLAY_FIELDS: &[&str] = &[
    "Title",
    "Series",
    "Number",
    "Year",
    "Month",
    "Volume",
    "Summary",
    "StoryArc",
    "AgeRating",
    "Writer",
    "Penciller",
    "Inker",
    "Colorist",
    "Letterer",
    "CoverArtist",
    "Editor",
    "Publisher",
];

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct PageHint {
    image: usize,
    kind: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

/// Parsed ComicInfo.xml: display fields plus per-page layout hints
#[derive(Clone, Debug, Default)]
pub struct ComicInfo {
    fields: Vec<(String, String)>,
    pages: Vec<PageHint>,
}

impl ComicInfo {
    /// Parse raw ComicInfo.xml bytes. Malformed documents yield `None`.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let text = match std::str::from_utf8(bytes) {
            Ok(text) => text.trim_start_matches('\u{feff}'),
            Err(e) => {
                warn!("ComicInfo.xml is not valid UTF-8: {e}");
                return None;
            }
        };
        let doc = match roxmltree::Document::parse(text) {
            Ok(doc) => doc,
            Err(e) => {
                warn!("Failed to parse ComicInfo.xml: {e}");
                return None;
            }
        };
        let root = doc.root_element();

        let fields = DISPLAY_FIELDS
            .iter()
            .filter_map(|&field| {
                let text = root
                    .children()
                    .find(|n| n.has_tag_name(field))
                    .and_then(|n| n.text())
                    .map(str::trim)
                    .filter(|t| !t.is_empty())?;
                Some((field.to_string(), text.to_string()))
            })
            .collect();

        let pages = root
            .descendants()
            .filter(|n| n.has_tag_name("Page"))
            .filter_map(|n| {
                let image = n.attribute("Image")?.trim().parse().ok()?;
                Some(PageHint {
                    image,
                    kind: n.attribute("Type").map(str::to_string),
                    width: n.attribute("ImageWidth").and_then(|w| w.trim().parse().ok()),
                    height: n.attribute("ImageHeight").and_then(|h| h.trim().parse().ok()),
                })
            })
            .collect::<Vec<_>>();

        debug!("ComicInfo: {} page hints", pages.len());
        Some(Self { fields, pages })
    }

    /// Whether there is anything to show to the reader
    #[must_use]
    pub fn has_info(&self) -> bool {
        !self.fields.is_empty()
    }

    /// `"Field:  value"` lines for the non-empty display fields
    #[must_use]
    pub fn info_lines(&self) -> Vec<String> {
        self.fields
            .iter()
            .map(|(name, value)| format!("{name}:  {value}"))
            .collect()
    }

    /// Whether the page at `index` may be shown next to another page.
    ///
    /// Covers must stand alone; pages with known dimensions can pair when they
    /// are taller than wide. `None` when the metadata says nothing useful.
    #[must_use]
    pub fn can_be_double_page(&self, index: usize) -> Option<bool> {
        let hint = self.pages.iter().find(|p| p.image == index)?;
        if matches!(hint.kind.as_deref(), Some("FrontCover" | "BackCover")) {
            return Some(false);
        }
        match (hint.width, hint.height) {
            (Some(width), Some(height)) => Some(width < height),
            _ => None,
        }
    }
}
