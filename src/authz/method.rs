use super::store::PERM_WRITE;

/// Permission bits a verb needs on the target path. Read-class verbs need
/// none beyond the path resolving to at least one entry.
///
/// Unrecognized verbs are let through so that clients speaking newer WebDAV
/// extensions keep working behind the gateway.
pub fn required_perm(method: &str) -> u32 {
    match method {
        "HEAD" | "PROPFIND" | "GET" | "OPTIONS" | "TRACE" | "REPORT" => 0,

        "PROPPATCH" | "MKCOL" | "MKCALENDAR" | "COPY" | "MOVE" | "LOCK" | "UNLOCK" | "DELETE"
        | "POST" | "PUT" | "ACL" | "CONNECT" | "MKACTIVITY" | "MERGE" => PERM_WRITE,

        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_perm() {
        for method in ["HEAD", "PROPFIND", "GET", "OPTIONS", "TRACE", "REPORT"] {
            assert_eq!(required_perm(method), 0, "{method}");
        }

        for method in [
            "PROPPATCH",
            "MKCOL",
            "MKCALENDAR",
            "COPY",
            "MOVE",
            "LOCK",
            "UNLOCK",
            "DELETE",
            "POST",
            "PUT",
            "ACL",
            "CONNECT",
            "MKACTIVITY",
            "MERGE",
        ] {
            assert_eq!(required_perm(method), PERM_WRITE, "{method}");
        }

        assert_eq!(required_perm("CHECKOUT"), 0);
        assert_eq!(required_perm("put"), 0);
    }
}
