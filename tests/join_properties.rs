use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use refl_join::combine::{AverageMode, Normbase, QGrid};
use refl_join::{join, rebin, FileOrder, JoinOptions, ReflDataset};
use refl_testdata::{gen_repeated_scans, gen_scan, Profile, Scan, WAVELENGTH, WAVELENGTH_SPREAD};

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn to_dataset(scan: &Scan) -> ReflDataset {
    let (v, dv) = scan.rates();
    ReflDataset::new(scan.name.clone(), Normbase::Monitor, v, dv)
        .with_specular_angles(scan.ti.clone(), scan.dt)
        .with_wavelength(WAVELENGTH, WAVELENGTH_SPREAD)
        .with_monitor(scan.monitor.clone(), 1.0)
}

fn close(a: f64, b: f64, rtol: f64) -> bool {
    (a - b).abs() <= rtol * a.abs().max(b.abs()).max(1e-300)
}

#[test]
fn repeated_scans_merge_to_pooled_rate() {
    init_logs();
    let n = 40;
    let repeats = 4;
    let scans = gen_repeated_scans(Profile::Flat { rate: 0.05 }, n, repeats, 17);
    let data: Vec<ReflDataset> = scans.iter().map(to_dataset).collect();

    let out = join(&data, &JoinOptions::default()).expect("join");
    assert_eq!(out.len(), 1);
    let joined = &out[0];
    assert_eq!(joined.len(), n);
    assert_eq!(joined.merged.as_deref(), Some(&vec![repeats; n][..]));

    // output is sorted by Qz, which follows the nominal angle order
    for k in 0..n {
        let counts: f64 = scans.iter().map(|s| s.counts[k]).sum();
        let monitor: f64 = scans.iter().map(|s| s.monitor[k]).sum();
        let pooled = counts / monitor;
        assert!(
            close(joined.v[k], pooled, 1e-9),
            "point {k}: {} vs pooled {pooled}",
            joined.v[k]
        );
        let pooled_dv = pooled * (1.0 / counts + 1.0 / monitor).sqrt();
        assert!(close(joined.dv[k], pooled_dv, 1e-9));
    }
}

#[test]
fn file_order_does_not_change_merged_values() {
    let scans = gen_repeated_scans(
        Profile::Fresnel {
            qc: 0.0217,
            background: 1e-6,
        },
        30,
        5,
        99,
    );
    let data: Vec<ReflDataset> = scans.iter().map(to_dataset).collect();
    let options = JoinOptions::builder()
        .order(FileOrder::None)
        .build()
        .expect("options");
    let reference = join(&data, &options).expect("join").remove(0);
    let (_, ref_qz, _) = reference.q_columns().expect("q");

    let mut rng = StdRng::seed_from_u64(5);
    for _ in 0..5 {
        let mut shuffled = data.clone();
        shuffled.shuffle(&mut rng);
        let got = join(&shuffled, &options).expect("join").remove(0);
        let (_, qz, _) = got.q_columns().expect("q");
        assert_eq!(got.len(), reference.len());
        for k in 0..got.len() {
            assert!(close(qz[k], ref_qz[k], 1e-12));
            assert!(
                (got.v[k] - reference.v[k]).abs() <= 1e-12 * reference.v[k].abs() + 1e-300,
                "v[{k}] {} vs {}",
                got.v[k],
                reference.v[k]
            );
            assert!(close(got.dv[k], reference.dv[k], 1e-9));
        }
    }
}

#[test]
fn unnormalized_counts_are_summed() {
    let make = |name: &str, y: f64| {
        ReflDataset::new(name, Normbase::None, vec![y], vec![y.sqrt()])
            .with_specular_angles(vec![1.0], 0.01)
            .with_wavelength(WAVELENGTH, WAVELENGTH_SPREAD)
    };
    let data = vec![make("a", 3.0), make("b", 4.0), make("c", 5.0)];
    let out = join(&data, &JoinOptions::default()).expect("join").remove(0);
    assert_eq!(out.v, vec![12.0]);
    assert!(close(out.dv[0], 12f64.sqrt(), 1e-12));
}

#[test]
fn all_zero_counts_keep_a_nonzero_uncertainty() {
    let scans: Vec<Scan> = (0..3)
        .map(|r| Scan {
            name: format!("dark-{r}"),
            ti: vec![2.0],
            dt: 0.01,
            monitor: vec![1000.0],
            counts: vec![0.0],
        })
        .collect();
    let data: Vec<ReflDataset> = scans.iter().map(to_dataset).collect();
    let out = join(&data, &JoinOptions::default()).expect("join").remove(0);
    assert_eq!(out.v, vec![0.0]);
    assert!(out.dv[0] > 0.0 && out.dv[0].is_finite());
}

#[test]
fn poisson_and_gauss_agree_at_high_counts() {
    let scans = gen_repeated_scans(Profile::Flat { rate: 0.5 }, 20, 3, 3);
    let data: Vec<ReflDataset> = scans.iter().map(to_dataset).collect();
    let poisson = join(&data, &JoinOptions::default()).expect("join").remove(0);
    let gauss_opts = JoinOptions::builder()
        .average(AverageMode::Gauss)
        .build()
        .expect("options");
    let gauss = join(&data, &gauss_opts).expect("join").remove(0);
    for k in 0..poisson.len() {
        assert!(close(poisson.v[k], gauss.v[k], 0.01));
        assert!(close(poisson.dv[k], gauss.dv[k], 0.05));
    }
}

#[test]
fn rebin_keeps_every_point_inside_the_grid() {
    let scan = gen_scan(Profile::Flat { rate: 0.2 }, 200, (0.1, 2.0), 1.0e4, 8);
    let data = vec![to_dataset(&scan)];
    let grid = QGrid::new(0.01, 0.04, 0.002, None).expect("grid");
    let binned = rebin(&data, &grid, AverageMode::Gauss).expect("rebin");

    let edges = grid.edges(false).expect("edges");
    let (lo, hi) = (edges.as_slice()[0], edges.as_slice()[edges.n_bins()]);
    let (_, qz_in, _) = data[0].q_columns().expect("q");
    let inside = qz_in.iter().filter(|&&q| (lo..hi).contains(&q)).count();
    let merged: usize = binned.merged.as_deref().expect("merged").iter().sum();
    assert_eq!(merged, inside);

    let (_, qz, dq) = binned.q_columns().expect("q");
    assert!(qz.windows(2).all(|w| w[0] < w[1]));
    assert!(qz.iter().all(|&q| (lo..hi).contains(&q)));
    assert!(dq.iter().all(|d| d.is_finite() && *d > 0.0));
    assert!(!binned.warnings.is_empty(), "out-of-range points are reported");
}

#[test]
fn progressive_grid_widens_toward_qmax() {
    let grid = QGrid::new(0.01, 0.2, 0.001, Some(0.01)).expect("grid");
    let centers = grid.centers().expect("centers");
    let steps: Vec<f64> = centers.windows(2).map(|w| w[1] - w[0]).collect();
    assert!(steps.windows(2).all(|w| w[1] >= w[0] - 1e-15));
    assert!(steps[0] < 0.002);
    assert!(*steps.last().expect("steps") > 0.008);
}
