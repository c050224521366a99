// SPDX-License-Identifier: Apache-2.0

//! CPU-affinity list parser (spec §4.H): `list := item (',' item)*;
//! item := N | N '-' M`, yielding the union of specified core ids clamped
//! to `[0, nproc)`. Malformed input aborts parsing with an empty list and a
//! diagnostic rather than a partial result, matching spec §8's
//! `parse("0-")` -> diagnostic, empty example.

/// Parses a CPU affinity spec against a host with `nproc` cores. Returns
/// the ordered, deduplicated set of core ids, or an empty `Vec` (with a
/// logged diagnostic) on malformed input.
pub fn parse(spec: &str, nproc: usize) -> Vec<usize> {
    if spec.is_empty() {
        return Vec::new();
    }

    let mut cores = Vec::new();
    for item in spec.split(',') {
        let item = item.trim();
        if item.is_empty() {
            log::error!("[ Launcher ] invalid CPU affinity range: {:?}", spec);
            return Vec::new();
        }

        match item.split_once('-') {
            None => match parse_core(item, nproc, spec) {
                Some(n) => push_unique(&mut cores, n),
                None => return Vec::new(),
            },
            Some((lo, hi)) => {
                let lo = match parse_core(lo, nproc, spec) {
                    Some(n) => n,
                    None => return Vec::new(),
                };
                let hi = match parse_core(hi, nproc, spec) {
                    Some(n) => n,
                    None => return Vec::new(),
                };
                if lo > hi {
                    log::error!("[ Launcher ] invalid CPU affinity range: {:?}", spec);
                    return Vec::new();
                }
                for n in lo..=hi {
                    push_unique(&mut cores, n);
                }
            }
        }
    }

    cores
}

fn push_unique(cores: &mut Vec<usize>, n: usize) {
    if !cores.contains(&n) {
        cores.push(n);
    }
}

fn parse_core(s: &str, nproc: usize, whole: &str) -> Option<usize> {
    match s.parse::<usize>() {
        Ok(n) if n < nproc => Some(n),
        Ok(n) => {
            log::error!(
                "[ Launcher ] invalid CPU affinity range: {:?}, value {} is larger or equal than the number of available cores ({})",
                whole,
                n,
                nproc
            );
            None
        }
        Err(_) => {
            log::error!("[ Launcher ] invalid CPU affinity range: {:?}", whole);
            None
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_is_empty() {
        assert_eq!(parse("", 8), Vec::<usize>::new());
    }

    #[test]
    fn range_and_single() {
        assert_eq!(parse("0-2,4", 8), vec![0, 1, 2, 4]);
    }

    #[test]
    fn out_of_range_is_rejected() {
        assert_eq!(parse("9", 4), Vec::<usize>::new());
    }

    #[test]
    fn trailing_dash_is_rejected() {
        assert_eq!(parse("0-", 4), Vec::<usize>::new());
    }

    #[test]
    fn dedups_overlapping_ranges() {
        assert_eq!(parse("0-2,1-3", 8), vec![0, 1, 2, 3]);
    }
}
