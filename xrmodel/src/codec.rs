//! C8: bidirectional encoding between upstream repo names (which contain `/`) and the
//! xRegistry id segment that names them in a URL path (which can't).

/// `encode_image_name("a/b/c") == "a~b~c"`
pub fn encode_image_name(name: &str) -> String {
    name.replace('/', "~")
}

/// `decode_image_name("a~b~c") == "a/b/c"`
pub fn decode_image_name(id: &str) -> String {
    id.replace('~', "/")
}

/// Every path segment the router pulls out of a URL is percent-decoded before it reaches the
/// id codec or the flag pipeline.
pub fn percent_decode_segment(segment: &str) -> String {
    urlencoding::decode(segment)
        .map(|cow| cow.into_owned())
        .unwrap_or_else(|_| segment.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_is_identity() {
        for name in ["nginx", "library/nginx", "a/b/c", "dotnet/runtime"] {
            assert_eq!(decode_image_name(&encode_image_name(name)), name);
        }
    }

    #[test]
    fn encode_uses_tilde() {
        assert_eq!(encode_image_name("a/b/c"), "a~b~c");
        assert_eq!(decode_image_name("a~b~c"), "a/b/c");
    }

    #[test]
    fn percent_decode_handles_encoded_segments() {
        assert_eq!(percent_decode_segment("dotnet%7Eruntime"), "dotnet~runtime");
        assert_eq!(percent_decode_segment("plain"), "plain");
    }
}
