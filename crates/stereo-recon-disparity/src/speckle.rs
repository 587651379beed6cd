use crate::DisparityMap;

/// Invalidate 4-connected regions of at most `max_size` pixels.
///
/// Neighbours belong to the same region when their disparities differ by at
/// most `max_diff`. Pixels already equal to `invalid` are never grouped.
/// Returns the number of pixels reset to `invalid`.
pub fn filter_speckles(
    map: &mut DisparityMap,
    invalid: f32,
    max_size: usize,
    max_diff: f32,
) -> usize {
    let (w, h) = (map.width as usize, map.height as usize);
    let mut label = vec![0u32; w * h];
    let mut stack = Vec::new();
    let mut region = Vec::new();
    let mut next = 0u32;
    let mut removed = 0;

    for start in 0..w * h {
        if label[start] != 0 || map.data[start] == invalid {
            continue;
        }
        next += 1;
        label[start] = next;
        stack.push(start);
        region.clear();

        while let Some(i) = stack.pop() {
            region.push(i);
            let (x, y) = (i % w, i / w);
            let d = map.data[i];
            let neighbours = [
                (x > 0).then(|| i - 1),
                (x + 1 < w).then(|| i + 1),
                (y > 0).then(|| i - w),
                (y + 1 < h).then(|| i + w),
            ];
            for n in neighbours.into_iter().flatten() {
                if label[n] == 0 && map.data[n] != invalid && (map.data[n] - d).abs() <= max_diff {
                    label[n] = next;
                    stack.push(n);
                }
            }
        }

        if region.len() <= max_size {
            for &i in &region {
                map.data[i] = invalid;
            }
            removed += region.len();
        }
    }
    removed
}
