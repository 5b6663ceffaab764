pub mod extraction;
pub mod fetch;
pub mod layout;
pub mod ocr;
pub mod rendering;
pub mod segmentation;
pub mod translation;

// Re-export commonly used services
pub use extraction::RegionExtractor;
pub use fetch::{extract_first_url, fetch_image};
pub use layout::{TextLayout, TextLayoutEngine, TextMeasure};
pub use ocr::{OcrEngine, TesseractOcr};
pub use rendering::{BubbleRenderer, CosmicTextRenderer, RenderOutcome, TextRenderer};
pub use segmentation::BubbleSegmenter;
pub use translation::{ApiClient, GoogleTranslator, TranslationChain, Translator};
