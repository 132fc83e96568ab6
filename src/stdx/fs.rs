use std::path::Path;

/// Characters that cannot appear in a file name on at least one supported
/// platform, paired with their fullwidth stand-ins.
const REPLACEMENTS: [(char, char); 9] = [
    ('\\', '＼'),
    ('/', '／'),
    (':', '：'),
    ('*', '＊'),
    ('?', '？'),
    ('"', '＂'),
    ('<', '＜'),
    ('>', '＞'),
    ('|', '｜'),
];

/// Turns an arbitrary title into a usable file name.
///
/// HTML entities are unescaped first, then characters that are invalid in
/// file names are swapped for their fullwidth lookalikes. Trailing dots and
/// whitespace are trimmed. Do not pass a path here; separators get smashed.
pub fn safe_name(name: &str) -> String {
    let unescaped = html_escape::decode_html_entities(name);

    let mut result = String::with_capacity(unescaped.len());
    for char in unescaped.chars() {
        match REPLACEMENTS.iter().find(|(from, _)| *from == char) {
            Some((_, to)) => result.push(*to),
            None if char.is_control() => {}
            None => result.push(char),
        }
    }

    result.trim_end_matches(['.', ' ']).to_owned()
}

/// Extracts a lowercased file extension from a file name or URL, ignoring any
/// query string.
pub fn file_extension(filename_or_url: &str) -> Option<String> {
    let path = match url::Url::parse(filename_or_url) {
        Ok(url) => url.path().to_owned(),
        // Plain file names land here.
        Err(_) => filename_or_url.to_owned(),
    };

    let extension = Path::new(&path).extension()?.to_str()?;

    if extension.is_empty() || !extension.chars().all(|char| char.is_ascii_alphanumeric()) {
        return None;
    }

    Some(extension.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn should_replace_invalid_characters_with_fullwidth() {
        assert_eq!("내가 ＜소녀＞를 도와줬다？", safe_name("내가 <소녀>를 도와줬다?"));
        assert_eq!("a／b＼c", safe_name("a/b\\c"));
    }

    #[test]
    fn should_unescape_html_entities() {
        assert_eq!("Tom & Jerry", safe_name("Tom &amp; Jerry"));
    }

    #[test]
    fn should_trim_trailing_dots_and_spaces() {
        assert_eq!("ending", safe_name("ending.. "));
    }

    #[test]
    fn should_find_extension_in_urls_and_names() {
        assert_eq!(
            Some("jpg".to_owned()),
            file_extension("https://example.com/image/001.JPG?type=q90")
        );
        assert_eq!(Some("png".to_owned()), file_extension("thumbnail.png"));
        assert_eq!(None, file_extension("no-extension"));
    }
}
