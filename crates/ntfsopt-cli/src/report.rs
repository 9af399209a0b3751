//! Minimal plain-text report printed once a job finishes. Real cluster-map
//! rendering, progress bars and the rest of presentation are out of scope
//! per spec §1 — this exists so the binary has *something* to show for a
//! run, not as a rendering subsystem.
use ntfsopt_core::job::JobHandle;
use ntfsopt_core::model::ClusterColor;
use std::time::Duration;

fn color_glyph(color: ClusterColor) -> char {
    match color {
        ClusterColor::Unused => ' ',
        ClusterColor::Free => '.',
        ClusterColor::System => 'S',
        ClusterColor::Fragmented => '!',
        ClusterColor::Unfragmented => '#',
        ClusterColor::Directory => 'D',
        ClusterColor::Compressed => 'C',
        ClusterColor::MftZone => 'z',
        ClusterColor::Mft => 'M',
        ClusterColor::TemporarySystem => 'T',
    }
}

pub fn print(handle: &JobHandle, elapsed: Duration) {
    let p = &handle.progress;

    println!();
    if let Some(err) = &handle.error {
        println!("FAILED: {err} (code {})", err.code().as_i32());
    } else if p.completion_status == 2 {
        println!("cancelled ({:.1}% complete)", p.percentage);
    } else {
        println!("done in {:.1}s", elapsed.as_secs_f64());
    }

    println!(
        "files: {}  directories: {}  compressed: {}  fragmented: {} ({} fragments)",
        p.files, p.directories, p.compressed, p.fragmented, p.fragments
    );
    println!(
        "space: {:.1} GiB total, {:.1} GiB free, MFT {:.1} MiB",
        p.total_space as f64 / (1u64 << 30) as f64,
        p.free_space as f64 / (1u64 << 30) as f64,
        p.mft_size as f64 / (1u64 << 20) as f64
    );
    println!(
        "moves: {} ({} clusters moved, {} processed of {} candidates, {} passes)",
        p.total_moves, p.moved_clusters, p.processed_clusters, p.clusters_to_process, p.pass_number
    );

    let cols = p.cluster_map.cols();
    let rows = p.cluster_map.rows();
    if rows * cols == 0 {
        return;
    }
    println!();
    for r in 0..rows {
        let mut line = String::with_capacity(cols);
        for c in 0..cols {
            line.push(p.cluster_map.get(r, c).map(color_glyph).unwrap_or(' '));
        }
        println!("{line}");
    }
}
