pub mod bubble_translator;

pub use bubble_translator::BubbleTranslator;
