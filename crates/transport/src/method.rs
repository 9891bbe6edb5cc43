use std::fmt;

/// Request methods accepted by the registration surface.
///
/// `Any` is the catch-all: a registration under `Any` is offered every
/// request regardless of its wire method. There is no `TRACE`; an engine
/// that parses it on the wire reports the request as unmatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Any,
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Options,
    Connect,
    Head,
}

impl Method {
    /// Number of variants, sized for per-method dispatch tables.
    pub const COUNT: usize = 9;

    /// Every variant, in declaration order.
    pub const ALL: [Method; Method::COUNT] = [
        Method::Any,
        Method::Get,
        Method::Post,
        Method::Put,
        Method::Patch,
        Method::Delete,
        Method::Options,
        Method::Connect,
        Method::Head,
    ];

    /// Dense index into a `[_; Method::COUNT]` table.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Method::Any => "*",
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
            Method::Connect => "CONNECT",
            Method::Head => "HEAD",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_is_dense_and_unique() {
        for (position, method) in Method::ALL.iter().enumerate() {
            assert_eq!(method.index(), position);
        }
    }

    #[test]
    fn display_matches_wire_names() {
        assert_eq!(Method::Get.to_string(), "GET");
        assert_eq!(Method::Any.to_string(), "*");
        assert_eq!(Method::Head.as_str(), "HEAD");
    }
}
