use serde::{Deserialize, Serialize};

/// Vertical offset of the quote affordance above the selection
const AFFORDANCE_OFFSET_Y: f64 = 40.0;
/// Half the affordance width, to center it over the selection
const AFFORDANCE_HALF_WIDTH: f64 = 50.0;

/// Bounding box of a selection, in viewport coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub top: f64,
    pub left: f64,
    pub width: f64,
    pub height: f64,
}

/// Raw selection as reported by the rendering layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionSnapshot {
    pub text: String,
    #[serde(default)]
    pub collapsed: bool,
    /// Id of the message element the selection is anchored in
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub bounds: Rect,
}

/// Where to place the "quote" affordance
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnchorPoint {
    pub top: f64,
    pub left: f64,
}

/// Live, quotable selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionHighlight {
    pub text: String,
    pub source_message_id: String,
    pub anchor: AnchorPoint,
}

/// Context attached to the next outbound message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub text: String,
    pub source_message_id: Option<String>,
}

/// Tracks the live selection and the pending quote
#[derive(Debug, Clone, Default)]
pub struct QuoteSelectionController {
    highlight: Option<SelectionHighlight>,
    pending: Option<Quote>,
}

impl QuoteSelectionController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed every selection change. Anything that is not a non-empty,
    /// visible selection inside a message clears the highlight.
    pub fn on_selection_change(&mut self, selection: &SelectionSnapshot) -> Option<&SelectionHighlight> {
        self.highlight = Self::highlight_for(selection);
        self.highlight.as_ref()
    }

    fn highlight_for(selection: &SelectionSnapshot) -> Option<SelectionHighlight> {
        if selection.collapsed {
            return None;
        }

        let text = selection.text.trim();
        if text.is_empty() {
            return None;
        }

        let source_message_id = selection.message_id.clone().filter(|id| !id.is_empty())?;

        let rect = selection.bounds;
        if rect.width <= 0.0 || rect.height <= 0.0 {
            return None;
        }

        Some(SelectionHighlight {
            text: text.to_string(),
            source_message_id,
            anchor: AnchorPoint {
                top: rect.top - AFFORDANCE_OFFSET_Y,
                left: rect.left + rect.width / 2.0 - AFFORDANCE_HALF_WIDTH,
            },
        })
    }

    pub fn highlight(&self) -> Option<&SelectionHighlight> {
        self.highlight.as_ref()
    }

    pub fn pending(&self) -> Option<&Quote> {
        self.pending.as_ref()
    }

    /// Move the live selection into the pending quote
    pub fn confirm_quote(&mut self) -> Option<&Quote> {
        let highlight = self.highlight.take()?;
        self.pending = Some(Quote {
            text: highlight.text,
            source_message_id: Some(highlight.source_message_id),
        });
        self.pending.as_ref()
    }

    pub fn dismiss_quote(&mut self) {
        self.pending = None;
    }

    /// Consume the pending quote. Called on every send attempt.
    pub fn take_quote(&mut self) -> Option<Quote> {
        self.pending.take()
    }

    pub fn reset(&mut self) {
        self.highlight = None;
        self.pending = None;
    }
}
