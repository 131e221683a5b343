#[macro_export]
macro_rules! assert_f64_approx {
    ($l:expr, $r:expr) => {
        match (&$l, &$r) {
            (l, r) => assert!((*l - *r).abs() < 1e-9, "assertion failed: {} !~ {}", l, r),
        }
    };
    ($l:expr, $r:expr, $msg:expr) => {
        match (&$l, &$r) {
            (l, r) => assert!(
                (*l - *r).abs() < 1e-9,
                "assertion failed: {} !~ {}: {}",
                l,
                r,
                $msg
            ),
        }
    };
}
