use anyhow::{anyhow, Result};
use std::collections::BTreeSet;

/// 闭区间端口范围
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

fn parse_port(raw: &str) -> Result<u16> {
    let port: u16 = raw
        .trim()
        .parse()
        .map_err(|_| anyhow!("无效的端口号: {}", raw))?;
    if port == 0 {
        return Err(anyhow!("无效的端口号: {}", raw));
    }
    Ok(port)
}

/// 解析端口范围字符串
/// 格式: "10000-20000,30000-40000" 或 "8080"
pub fn parse_port_ranges(range_str: &str) -> Result<Vec<PortRange>> {
    let ranges = range_str
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('-') {
            Some((start, end)) => {
                let (start, end) = (parse_port(start)?, parse_port(end)?);
                if start > end {
                    return Err(anyhow!("无效的端口范围: {}-{}", start, end));
                }
                Ok(PortRange { start, end })
            }
            None => parse_port(part).map(|port| PortRange { start: port, end: port }),
        })
        .collect::<Result<Vec<_>>>()?;

    if ranges.is_empty() {
        return Err(anyhow!("端口范围不能为空"));
    }
    Ok(ranges)
}

/// 账户端口合法范围 1-65535
pub fn is_valid_port(port: i32) -> bool {
    (1..=65535).contains(&port)
}

/// 按范围顺序取出最多 count 个未被占用的端口
pub fn free_ports(ranges: &[PortRange], used: &BTreeSet<i32>, count: usize) -> Vec<i32> {
    ranges
        .iter()
        .flat_map(|r| r.start..=r.end)
        .map(i32::from)
        .filter(|port| !used.contains(port))
        .take(count)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_port_ranges() {
        // 单个端口
        let ranges = parse_port_ranges("8080").unwrap();
        assert_eq!(ranges, vec![PortRange { start: 8080, end: 8080 }]);

        // 端口范围
        let ranges = parse_port_ranges("10000-60000").unwrap();
        assert_eq!(ranges, vec![PortRange { start: 10000, end: 60000 }]);

        // 混合格式
        let ranges = parse_port_ranges("8080, 1000-2000,3000").unwrap();
        assert_eq!(ranges.len(), 3);

        // 无效格式
        assert!(parse_port_ranges("invalid").is_err());
        assert!(parse_port_ranges("1000-").is_err());
        assert!(parse_port_ranges("9999-1000").is_err());
        assert!(parse_port_ranges("0").is_err());
        assert!(parse_port_ranges("1-2-3").is_err());
        assert!(parse_port_ranges(" , ").is_err());
    }

    #[test]
    fn test_is_valid_port() {
        assert!(is_valid_port(1));
        assert!(is_valid_port(65535));
        assert!(!is_valid_port(0));
        assert!(!is_valid_port(65536));
        assert!(!is_valid_port(-1));
    }

    #[test]
    fn test_free_ports_skips_used() {
        let ranges = parse_port_ranges("9000-9003,9100").unwrap();
        let used: BTreeSet<i32> = [9000, 9002].into_iter().collect();

        assert_eq!(free_ports(&ranges, &used, 2), vec![9001, 9003]);
        assert_eq!(free_ports(&ranges, &used, 10), vec![9001, 9003, 9100]);
        assert!(free_ports(&ranges, &used, 0).is_empty());
    }
}
