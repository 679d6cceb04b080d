//! Textual guess at which standard uniforms a fragment shader actually reads.
//!
//! This is a token count, not a parse: one occurrence is taken to be the
//! declaration, anything more is a use. A uniform that is declared and read
//! exactly once, or only reached through a macro, is reported as unused.

pub const TIME: &str = "u_time";
pub const DELTA: &str = "u_delta";
pub const DATE: &str = "u_date";
pub const RESOLUTION: &str = "u_resolution";
pub const MOUSE: &str = "u_mouse";

/// Counts occurrences of `token` as a whole identifier.
pub fn count_token(source: &str, token: &str) -> usize {
    if token.is_empty() {
        return 0;
    }
    let bytes = source.as_bytes();
    let is_ident = |byte: u8| byte.is_ascii_alphanumeric() || byte == b'_';
    source
        .match_indices(token)
        .filter(|(start, _)| {
            let end = start + token.len();
            let before = *start == 0 || !is_ident(bytes[start - 1]);
            let after = end >= bytes.len() || !is_ident(bytes[end]);
            before && after
        })
        .count()
}

fn is_used(source: &str, token: &str) -> bool {
    count_token(source, token) > 1
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UniformUsage {
    pub time: bool,
    pub delta: bool,
    pub date: bool,
    pub resolution: bool,
    pub mouse: bool,
}

impl UniformUsage {
    pub fn scan(fragment: &str) -> Self {
        Self {
            time: is_used(fragment, TIME),
            delta: is_used(fragment, DELTA),
            date: is_used(fragment, DATE),
            resolution: is_used(fragment, RESOLUTION),
            mouse: is_used(fragment, MOUSE),
        }
    }

    /// Whether the shader changes over time without external input.
    pub fn is_animated(&self) -> bool {
        self.time || self.delta || self.date || self.mouse
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_whole_identifiers_only() {
        let source = "uniform float u_time; float u_times = u_time * 2.0; my_u_time;";
        assert_eq!(count_token(source, TIME), 2);
    }

    #[test]
    fn declaration_alone_is_not_usage() {
        let usage = UniformUsage::scan("uniform float u_time;\nvoid main(){}");
        assert!(!usage.time);
        assert!(!usage.is_animated());
    }

    #[test]
    fn declaration_plus_read_is_usage() {
        let source = "uniform vec2 u_resolution;\nuniform float u_time;\n\
                      void main(){ vec2 st = gl_FragCoord.xy / u_resolution; float t = u_time; }";
        let usage = UniformUsage::scan(source);
        assert!(usage.time);
        assert!(usage.resolution);
        assert!(!usage.mouse);
        assert!(usage.is_animated());
    }
}
