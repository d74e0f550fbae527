use crate::alignment::windowing::canonical_token;
use crate::pipeline::traits::TokenCanonicalizer;

pub struct PunctuationStrippingCanonicalizer;

impl TokenCanonicalizer for PunctuationStrippingCanonicalizer {
    fn canonicalize(&self, raw: &str) -> String {
        canonical_token(raw)
    }
}
