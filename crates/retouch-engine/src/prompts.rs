//! Instruction templates sent with every generation request, and the preset
//! catalogues offered as quick picks for filters and adjustments.

use retouch_contracts::session::PreparedEdit;

const SAFETY_POLICY: &str = "Safety & Ethics Policy:\n\
- You MUST fulfil requests to adjust skin tone, such as 'give me a tan' or 'make my skin darker'. These are standard photo enhancements.\n\
- You MUST REFUSE any request to change a person's fundamental race or ethnicity. Do not perform these edits.";

const OUTPUT_RULE: &str = "Output: Return ONLY the final edited image. Do not return text.";

pub struct Preset {
    pub name: &'static str,
    pub instruction: &'static str,
}

pub const FILTER_PRESETS: &[Preset] = &[
    Preset {
        name: "synthwave",
        instruction: "Apply a vibrant 80s synthwave aesthetic with neon magenta and cyan glows and subtle scan lines.",
    },
    Preset {
        name: "anime",
        instruction: "Give the image a vibrant Japanese anime style with bold outlines, cel-shading and saturated colours.",
    },
    Preset {
        name: "lomo",
        instruction: "Apply a Lomography-style cross-processing film effect with high-contrast, oversaturated colours and dark vignetting.",
    },
    Preset {
        name: "glitch",
        instruction: "Transform the image into a futuristic holographic projection with digital glitch effects and chromatic aberration.",
    },
];

pub const ADJUSTMENT_PRESETS: &[Preset] = &[
    Preset {
        name: "blur-background",
        instruction: "Apply a realistic depth-of-field effect, making the background blurry while keeping the main subject in sharp focus.",
    },
    Preset {
        name: "enhance-details",
        instruction: "Slightly enhance the sharpness and details of the image without making it look unnatural.",
    },
    Preset {
        name: "warmer-lighting",
        instruction: "Adjust the colour temperature to give the image warmer, golden-hour style lighting.",
    },
    Preset {
        name: "studio-light",
        instruction: "Add dramatic, professional studio lighting to the main subject.",
    },
];

/// Returns the preset instruction when `text` names one, else `text` itself.
pub fn expand_preset<'a>(catalogue: &'a [Preset], text: &'a str) -> &'a str {
    let key = text.trim();
    catalogue
        .iter()
        .find(|preset| preset.name.eq_ignore_ascii_case(key))
        .map(|preset| preset.instruction)
        .unwrap_or(text)
}

pub fn prompt_for(edit: &PreparedEdit) -> String {
    match edit {
        PreparedEdit::Localized {
            prompt, hotspot, ..
        } => {
            let (x, y) = hotspot.source_pixels();
            localized_edit_prompt(prompt, x, y)
        }
        PreparedEdit::Filter { prompt, .. } => filter_prompt(prompt),
        PreparedEdit::Adjustment { prompt, .. } => adjustment_prompt(prompt),
        PreparedEdit::Composite { .. } => composite_prompt(),
        PreparedEdit::ExtendBackdrop { .. } => extend_backdrop_prompt(),
        PreparedEdit::ReplaceBackdrop { .. } => replace_backdrop_prompt(),
        PreparedEdit::Enhance { .. } => enhance_prompt(),
    }
}

fn localized_edit_prompt(request: &str, x: u32, y: u32) -> String {
    format!(
        "You are an expert photo editor AI. Perform a natural, localized edit on the provided image based on the user's request.\n\
User Request: \"{request}\"\n\
Edit Location: Focus on the area around pixel coordinates (x: {x}, y: {y}).\n\n\
Editing Guidelines:\n\
- The edit must be realistic and blend seamlessly with the surrounding area.\n\
- The rest of the image (outside the immediate edit area) must remain identical to the original.\n\n\
{SAFETY_POLICY}\n\n\
{OUTPUT_RULE}"
    )
}

fn filter_prompt(request: &str) -> String {
    format!(
        "You are an expert photo editor AI. Apply a stylistic filter to the entire image based on the user's request. Do not change the composition or content, only apply the style.\n\
Filter Request: \"{request}\"\n\n\
{SAFETY_POLICY}\n\n\
Output: Return ONLY the final filtered image. Do not return text."
    )
}

fn adjustment_prompt(request: &str) -> String {
    format!(
        "You are an expert photo editor AI. Perform a natural, global adjustment to the entire image based on the user's request.\n\
User Request: \"{request}\"\n\n\
Editing Guidelines:\n\
- The adjustment must be applied across the entire image.\n\
- The result must be photorealistic.\n\n\
{SAFETY_POLICY}\n\n\
Output: Return ONLY the final adjusted image. Do not return text."
    )
}

fn composite_prompt() -> String {
    format!(
        "You are an expert photo compositor. You receive three images in order: a subject, a scene and a style reference.\n\
Place the subject naturally into the scene, matching perspective, scale and lighting, then render the whole result in the visual style of the style reference.\n\
Keep the subject recognisable; do not copy content from the style reference.\n\n\
{SAFETY_POLICY}\n\n\
{OUTPUT_RULE}"
    )
}

fn extend_backdrop_prompt() -> String {
    format!(
        "You are an expert photo editor AI. Extend the canvas of the provided image outward on every side, continuing the existing background naturally.\n\
The original content must stay unchanged and centred; new areas must match its lighting, texture and perspective.\n\n\
{OUTPUT_RULE}"
    )
}

fn replace_backdrop_prompt() -> String {
    format!(
        "You are an expert photo editor AI. You receive two images: a photo and a new background.\n\
Cut out the main subject of the first image and place it on the second image, matching lighting, shadows and colour grading so the result looks like a single photograph.\n\n\
{SAFETY_POLICY}\n\n\
{OUTPUT_RULE}"
    )
}

fn enhance_prompt() -> String {
    format!(
        "You are an expert photo restorer. Enhance the quality of the provided image: increase resolution and sharpness, reduce noise and compression artefacts, and restore natural detail.\n\
Do not change the composition, content or colours beyond what restoration requires.\n\n\
{OUTPUT_RULE}"
    )
}
