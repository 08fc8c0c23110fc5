pub mod gemini;
pub mod replay;
