//! Storage names for uploaded files

use deunicode::deunicode;
use uuid::Uuid;

/// Length of the random token appended to stored names
const TOKEN_LEN: usize = 16;

/// Extension of a client filename: the text after the last dot, or "" if
/// there is none.
pub fn client_extension(filename: &str) -> &str {
    match filename.rfind('.') {
        Some(i) => &filename[i + 1..],
        None => "",
    }
}

/// Lowercase ASCII slug with single dashes between words.
///
/// Input is transliterated to ASCII first. Whitespace, `-` and `_` separate
/// words, `@` becomes "at", and any other punctuation is dropped.
pub fn slugify(input: &str) -> String {
    let ascii = deunicode(input);
    let mut out = String::with_capacity(ascii.len());
    let mut separate = false;

    for ch in ascii.chars() {
        if ch.is_ascii_alphanumeric() {
            if separate && !out.is_empty() {
                out.push('-');
            }
            separate = false;
            out.push(ch.to_ascii_lowercase());
        } else if ch == '@' {
            if !out.is_empty() {
                out.push('-');
            }
            out.push_str("at");
            separate = true;
        } else if ch.is_whitespace() || ch == '-' || ch == '_' {
            separate = true;
        }
    }
    out
}

/// Random token that keeps stored names unique per disk
pub fn unique_token() -> String {
    let mut token = Uuid::new_v4().simple().to_string();
    token.truncate(TOKEN_LEN);
    token
}

/// Stored name for an upload: slug of the client name without its
/// extension, a unique token, then the slugged extension.
///
/// `"My Photo.JPG"` becomes something like `"my-photo-3f2a9c0d1e4b5a67.jpg"`.
pub fn unique_original_name(client_name: &str) -> String {
    let extension = client_extension(client_name);
    let stem = if extension.is_empty() {
        client_name.trim_end_matches('.')
    } else {
        &client_name[..client_name.len() - extension.len() - 1]
    };

    let mut name = slugify(stem);
    if !name.is_empty() {
        name.push('-');
    }
    name.push_str(&unique_token());

    let extension = slugify(extension);
    if !extension.is_empty() {
        name.push('.');
        name.push_str(&extension);
    }
    name
}

/// Path of a stored file on its disk: `<type>/<name>`
pub fn storage_path(file_type: &str, name: &str) -> String {
    format!("{}/{}", file_type.trim_matches('/'), name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_extension() {
        assert_eq!(client_extension("photo.jpg"), "jpg");
        assert_eq!(client_extension("archive.tar.gz"), "gz");
        assert_eq!(client_extension("README"), "");
        assert_eq!(client_extension("trailing."), "");
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("My Holiday Photo"), "my-holiday-photo");
        assert_eq!(slugify("  __Report (final) v2__ "), "report-final-v2");
        assert_eq!(slugify("a---b"), "a-b");
        assert_eq!(slugify("JPG"), "jpg");
        assert_eq!(slugify("!!!"), "");
        assert_eq!(slugify("don't stop"), "dont-stop");
        assert_eq!(slugify("me@home"), "me-at-home");
    }

    #[test]
    fn test_slugify_transliterates() {
        assert_eq!(slugify("Ảnh đẹp"), "anh-dep");
        assert_eq!(slugify("Crème Brûlée"), "creme-brulee");
        assert_eq!(slugify("Straße"), "strasse");
        assert_eq!(slugify("照片"), "zhao-pian");
        assert_eq!(slugify("l’été"), "lete");
    }

    #[test]
    fn test_unique_original_name_transliterates_stem() {
        let name = unique_original_name("Ảnh đẹp.JPG");
        assert!(name.starts_with("anh-dep-"));
        assert!(name.ends_with(".jpg"));
    }

    #[test]
    fn test_unique_original_name_shape() {
        let name = unique_original_name("My Photo.JPG");

        assert!(name.starts_with("my-photo-"));
        assert!(name.ends_with(".jpg"));
        let token = &name["my-photo-".len()..name.len() - ".jpg".len()];
        assert_eq!(token.len(), TOKEN_LEN);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_unique_original_name_drops_inner_dots_in_stem() {
        let name = unique_original_name("backup.2024.tar.gz");
        assert!(name.starts_with("backup2024tar-"));
        assert!(name.ends_with(".gz"));
    }

    #[test]
    fn test_unique_original_name_without_extension_or_stem() {
        let bare = unique_original_name("README");
        assert!(bare.starts_with("readme-"));
        assert!(!bare.contains('.'));

        let dotfile = unique_original_name(".env");
        assert_eq!(dotfile.len(), TOKEN_LEN + ".env".len());
        assert!(dotfile.ends_with(".env"));
    }

    #[test]
    fn test_unique_original_name_is_unique() {
        assert_ne!(
            unique_original_name("photo.jpg"),
            unique_original_name("photo.jpg")
        );
    }

    #[test]
    fn test_storage_path() {
        assert_eq!(storage_path("attachment", "a.png"), "attachment/a.png");
        assert_eq!(storage_path("/avatar/", "b.png"), "avatar/b.png");
    }
}
