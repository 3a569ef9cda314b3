use tantivy::tokenizer::{LowerCaser, SimpleTokenizer, StopWordFilter, TextAnalyzer, TokenStream};

const STOP_WORDS: &[&str] = &[
	"a","an","and","are","as","at","be","by","for","from","has","he","in","is","it","its","of","on","that","the","to","was","will","with","or","but","not","this","these","they","them","their","there","then","than","so","if","when","where","why","how","what","which","who","whom","whose","can","could","should","would","may","might","must","shall","do","does","did","have","had","having",
];

/// Splits text into lower-cased terms with English stop words removed.
///
/// The same analyzer must be used for indexing and for queries.
#[derive(Clone)]
pub struct Analyzer {
	inner: TextAnalyzer,
}

impl Analyzer {
	pub fn english() -> Self {
		let inner = TextAnalyzer::builder(SimpleTokenizer::default())
			.filter(LowerCaser)
			.filter(StopWordFilter::remove(STOP_WORDS.iter().map(|s| s.to_string())))
			.build();
		Self { inner }
	}

	/// Terms in text order, duplicates kept.
	pub fn terms(&self, text: &str) -> Vec<String> {
		let mut analyzer = self.inner.clone();
		let mut stream = analyzer.token_stream(text);
		let mut out = Vec::new();
		while stream.advance() { out.push(stream.token().text.clone()); }
		out
	}
}

/// Lets the `bm25` embedder tokenize documents and queries the same way.
impl bm25::Tokenizer for Analyzer {
	fn tokenize(&self, input_text: &str) -> Vec<String> { self.terms(input_text) }
}

impl Default for Analyzer {
	fn default() -> Self { Self::english() }
}

impl std::fmt::Debug for Analyzer {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str("Analyzer(english)") }
}
