use std::collections::BTreeSet;
use std::fmt;
use std::num::IntErrorKind;

const MIN_PORT: i64 = 1;
const MAX_PORT: i64 = 65_535;

/// Ports scanned when the request does not name any.
const DEFAULT_PORTS: &[u16] = &[
    21, 22, 23, 25, 53, 80, 110, 123, 135, 139, 143, 161, 389, 443, 445, 465, 587, 993, 995,
    1433, 1521, 1723, 2049, 3306, 3389, 5432, 5900, 6379, 8080,
];

/// An ascending, duplicate-free set of TCP ports in `1..=65535`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PortSet {
    ports: Vec<u16>,
}

impl PortSet {
    /// Parse a comma separated port spec such as `22,80,443` or `20-25,80`.
    ///
    /// Never fails:
    /// - fragments are trimmed, empty fragments are skipped
    /// - `A-B` is an inclusive range, reversed ends are accepted
    /// - a range with an unparseable end is dropped as a whole
    /// - values outside `1..=65535` are dropped
    ///
    /// A spec without any non-empty fragment yields [`PortSet::default_set`].
    pub fn parse(spec: &str) -> Self {
        let mut set = BTreeSet::new();
        let mut saw_fragment = false;

        for fragment in spec.split(',').map(str::trim) {
            if fragment.is_empty() {
                continue;
            }
            saw_fragment = true;

            if let Some((a, b)) = fragment.split_once('-') {
                let (Some(a), Some(b)) = (parse_int(a), parse_int(b)) else {
                    continue;
                };
                let lo = a.min(b).max(MIN_PORT);
                let hi = a.max(b).min(MAX_PORT);
                // lo/hi are inside the u16 domain once clamped
                set.extend((lo..=hi).map(|p| p as u16));
                continue;
            }

            if let Some(p) = parse_int(fragment).filter(|p| (MIN_PORT..=MAX_PORT).contains(p)) {
                set.insert(p as u16);
            }
        }

        if !saw_fragment {
            return Self::default_set();
        }
        Self {
            ports: set.into_iter().collect(),
        }
    }

    /// The fixed 29-port default list.
    pub fn default_set() -> Self {
        Self {
            ports: DEFAULT_PORTS.to_vec(),
        }
    }

    /// Build a set from arbitrary ports: drops 0, sorts and dedups.
    pub fn from_ports(ports: impl IntoIterator<Item = u16>) -> Self {
        let set: BTreeSet<u16> = ports.into_iter().filter(|&p| p != 0).collect();
        Self {
            ports: set.into_iter().collect(),
        }
    }

    pub fn as_slice(&self) -> &[u16] {
        &self.ports
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.ports.iter().copied()
    }
}

impl<'a> IntoIterator for &'a PortSet {
    type Item = u16;
    type IntoIter = std::iter::Copied<std::slice::Iter<'a, u16>>;

    fn into_iter(self) -> Self::IntoIter {
        self.ports.iter().copied()
    }
}

/// Renders the set as a compact spec, collapsing consecutive runs: `20-25,80`.
impl fmt::Display for PortSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        let mut i = 0;
        while i < self.ports.len() {
            let start = self.ports[i];
            let mut end = start;
            while i + 1 < self.ports.len() && self.ports[i + 1] == end + 1 {
                i += 1;
                end = self.ports[i];
            }
            if !first {
                f.write_str(",")?;
            }
            first = false;
            if start == end {
                write!(f, "{start}")?;
            } else {
                write!(f, "{start}-{end}")?;
            }
            i += 1;
        }
        Ok(())
    }
}

/// Shorthand for [`PortSet::parse`].
pub fn parse_port_spec(spec: &str) -> PortSet {
    PortSet::parse(spec)
}

/// Integers beyond the i64 range saturate so they still clamp to a valid port bound.
fn parse_int(s: &str) -> Option<i64> {
    match s.trim().parse::<i64>() {
        Ok(v) => Some(v),
        Err(e) => match e.kind() {
            IntErrorKind::PosOverflow => Some(i64::MAX),
            IntErrorKind::NegOverflow => Some(i64::MIN),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_single_ports() {
        let ports = PortSet::parse("443, 22 ,80");
        assert_eq!(ports.as_slice(), &[22, 80, 443]);
    }

    #[test]
    fn range_is_inclusive_and_order_independent() {
        let forward = PortSet::parse("20-25");
        assert_eq!(forward.as_slice(), &[20, 21, 22, 23, 24, 25]);
        assert_eq!(PortSet::parse("25-20"), forward);
        assert_eq!(PortSet::parse(" 20 - 25 "), forward);
    }

    #[test]
    fn range_with_bad_end_is_dropped_whole() {
        assert_eq!(PortSet::parse("20-x,80").as_slice(), &[80]);
        assert_eq!(PortSet::parse("-5,81").as_slice(), &[81]);
        assert_eq!(PortSet::parse("1-2-3,82").as_slice(), &[82]);
    }

    #[test]
    fn range_is_clamped() {
        let ports = PortSet::parse("65530-70000");
        assert_eq!(ports.as_slice(), &[65530, 65531, 65532, 65533, 65534, 65535]);
        assert_eq!(PortSet::parse("0-2").as_slice(), &[1, 2]);
        assert_eq!(PortSet::parse("1-99999999999").len(), 65535);
        assert_eq!(PortSet::parse("1-99999999999999999999").len(), 65535);
        assert_eq!(PortSet::parse("22,1-99999999999999999999").len(), 65535);
        assert_eq!(PortSet::parse("99999999999999999999-65534").as_slice(), &[65534, 65535]);
        assert_eq!(PortSet::parse("99999999999999999999,443").as_slice(), &[443]);
    }

    #[test]
    fn no_fragments_means_default() {
        for spec in ["", "   ", ",", " , ,"] {
            assert_eq!(PortSet::parse(spec), PortSet::default_set(), "spec {spec:?}");
        }
    }

    #[test]
    fn only_invalid_fragments_means_empty() {
        assert!(PortSet::parse("abc,0,70000").is_empty());
    }

    #[test]
    fn default_set_is_exact() {
        let d = PortSet::default_set();
        assert_eq!(d.len(), 29);
        assert_eq!(d.as_slice().first(), Some(&21));
        assert_eq!(d.as_slice().last(), Some(&8080));
        assert!(d.as_slice().windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn from_ports_normalizes() {
        let ports = PortSet::from_ports([443, 0, 22, 443, 80]);
        assert_eq!(ports.as_slice(), &[22, 80, 443]);
    }

    #[test]
    fn borrowed_iteration_is_ascending() {
        let ports = PortSet::parse("443,22,80");
        let mut seen = Vec::new();
        for p in &ports {
            seen.push(p);
        }
        assert_eq!(seen, vec![22, 80, 443]);
    }

    #[test]
    fn display_collapses_runs() {
        assert_eq!(PortSet::parse("80,20-25,22,443,444").to_string(), "20-25,80,443-444");
        assert_eq!(PortSet::from_ports([]).to_string(), "");
    }
}
