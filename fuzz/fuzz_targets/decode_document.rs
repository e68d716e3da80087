#![no_main]
use bson_stream::{Document, Reader, ReaderConfig, Token, UnknownTypes};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(doc) = Document::from_slice(data) {
        let enc = doc.to_vec().unwrap();
        let again = Document::from_slice(&enc).unwrap().to_vec().unwrap();
        assert_eq!(again, enc);
    }
    let config = ReaderConfig::new().unknown_types(UnknownTypes::Skip);
    let mut reader = Reader::with_config(data, config);
    while let Ok(token) = reader.next_token() {
        if token == Token::EndOfInput {
            break;
        }
    }
});
