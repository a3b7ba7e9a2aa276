use std::fmt;

/// Reasons a command is refused before any request is issued.
///
/// Every variant renders as the message shown in the error banner; none of
/// them leave state partially mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    NoImageLoaded,
    MissingPrompt,
    MissingHotspot,
    RequestInFlight,
    NotAnImage { mime_type: String },
    Fetch(String),
    CompareUnavailable,
    EmptyBatch,
    NothingToDownload,
}

impl InputError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoImageLoaded => "no_image_loaded",
            Self::MissingPrompt => "missing_prompt",
            Self::MissingHotspot => "missing_hotspot",
            Self::RequestInFlight => "request_in_flight",
            Self::NotAnImage { .. } => "not_an_image",
            Self::Fetch(_) => "fetch_failed",
            Self::CompareUnavailable => "compare_unavailable",
            Self::EmptyBatch => "empty_batch",
            Self::NothingToDownload => "nothing_to_download",
        }
    }
}

impl fmt::Display for InputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoImageLoaded => f.write_str("No image loaded to edit."),
            Self::MissingPrompt => f.write_str("Please enter a description for your edit."),
            Self::MissingHotspot => {
                f.write_str("Please click on the image to select an area to edit.")
            }
            Self::RequestInFlight => f.write_str("Another request is still in progress."),
            Self::NotAnImage { mime_type } if mime_type.is_empty() => {
                f.write_str("The selected file is not an image.")
            }
            Self::NotAnImage { mime_type } => {
                write!(f, "The selected file is not an image ({mime_type}).")
            }
            Self::Fetch(message) => f.write_str(message),
            Self::CompareUnavailable => {
                f.write_str("Comparison needs an edited version to compare against.")
            }
            Self::EmptyBatch => f.write_str("Please upload images to process."),
            Self::NothingToDownload => f.write_str("There are no processed images to download."),
        }
    }
}

impl std::error::Error for InputError {}
