use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::errors::HostError;

/// 请求序号集合，内部以有序、不重叠的闭区间保存
///
/// 文本形式为 `1-5,7,9-10`。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeSet {
    ranges: Vec<(u32, u32)>,
}

impl RangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// 集合中的序号个数
    pub fn size(&self) -> u64 {
        self.ranges
            .iter()
            .map(|(from, to)| u64::from(to - from) + 1)
            .sum()
    }

    pub fn contains(&self, value: u32) -> bool {
        self.ranges
            .iter()
            .any(|(from, to)| *from <= value && value <= *to)
    }

    pub fn add(&mut self, value: u32) {
        self.add_range(value, value);
    }

    pub fn add_range(&mut self, from: u32, to: u32) {
        let (from, to) = if from <= to { (from, to) } else { (to, from) };
        self.ranges.push((from, to));
        self.normalize();
    }

    /// 合并另一个集合
    pub fn add_all(&mut self, other: &RangeSet) {
        self.ranges.extend_from_slice(&other.ranges);
        self.normalize();
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.ranges.iter().flat_map(|(from, to)| *from..=*to)
    }

    fn normalize(&mut self) {
        self.ranges.sort_unstable();
        let mut merged: Vec<(u32, u32)> = Vec::with_capacity(self.ranges.len());
        for (from, to) in self.ranges.drain(..) {
            match merged.last_mut() {
                Some(last) if from <= last.1.saturating_add(1) => {
                    last.1 = last.1.max(to);
                }
                _ => merged.push((from, to)),
            }
        }
        self.ranges = merged;
    }
}

impl FromStr for RangeSet {
    type Err = HostError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut set = RangeSet::new();
        for part in text.split(',').map(str::trim).filter(|part| !part.is_empty()) {
            let parse = |value: &str| {
                value
                    .trim()
                    .parse::<u32>()
                    .map_err(|_| HostError::InvalidRange(text.to_string()))
            };
            match part.split_once('-') {
                Some((from, to)) => set.add_range(parse(from)?, parse(to)?),
                None => set.add(parse(part)?),
            }
        }
        Ok(set)
    }
}

impl fmt::Display for RangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (from, to)) in self.ranges.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            if from == to {
                write!(f, "{from}")?;
            } else {
                write!(f, "{from}-{to}")?;
            }
        }
        Ok(())
    }
}

impl Serialize for RangeSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RangeSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_size() {
        let set: RangeSet = "1-5,7, 9-10".parse().unwrap();
        assert_eq!(set.size(), 8);
        assert!(set.contains(3));
        assert!(!set.contains(6));
        assert_eq!(set.to_string(), "1-5,7,9-10");
    }

    #[test]
    fn test_empty_text_is_empty_set() {
        let set: RangeSet = "".parse().unwrap();
        assert!(set.is_empty());
        assert_eq!(set.size(), 0);
    }

    #[test]
    fn test_union_is_idempotent() {
        let mut set: RangeSet = "1-5".parse().unwrap();
        let same: RangeSet = "1-5".parse().unwrap();
        set.add_all(&same);
        assert_eq!(set.size(), 5);

        set.add(6);
        assert_eq!(set.to_string(), "1-6");
    }

    #[test]
    fn test_invalid_range_rejected() {
        assert!("1-x".parse::<RangeSet>().is_err());
        assert!("abc".parse::<RangeSet>().is_err());
    }
}
