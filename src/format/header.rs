//! C initializer corpus encoding

/// `{<len>, "\xNN...", "<text>"},\n`
pub fn header_line(binary: &[u8], text: &str) -> String {
    let escaped_bytes: String = binary.iter().map(|b| format!("\\x{:02x}", b)).collect();
    let escaped_text = text.replace('\\', "\\\\").replace('"', "\\\"");
    format!("{{{}, \"{}\", \"{}\"}},\n", binary.len(), escaped_bytes, escaped_text)
}
