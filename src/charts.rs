use chrono::Utc;
use plotters::prelude::*;
use std::error::Error;
use std::fs;

use crate::exchange::{MarketParams, SimulatedExchange, SlotSpec};
use crate::payoff_matrix::{fallback_distribution, PayoffMatrix};
use crate::prediction::WinCurve;

const CHART_DIR: &str = "charts";

/// Render every chart into the charts directory
pub fn generate_all_charts(bid_levels: usize) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(CHART_DIR)?;
    generate_win_curve_chart()?;
    generate_equilibrium_chart(bid_levels)?;
    generate_market_histogram()?;
    Ok(())
}

/// Win probability against price for a few slot floors
fn generate_win_curve_chart() -> Result<(), Box<dyn Error>> {
    let floors = [0.25, 0.5, 1.0];
    let colors = [BLUE, RED, GREEN];
    let max_price = floors.iter().cloned().fold(0.0, f64::max) * 3.0;

    let filename = format!("{}/win_curve.png", CHART_DIR);
    let root = BitMapBackend::new(&filename, (900, 600)).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption("Win Probability by Bid Price", ("sans-serif", 25))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(0.0..max_price, 0.0..1.0)?;
    chart.configure_mesh().x_desc("Bid price").y_desc("Win probability").draw()?;

    for (&floor, &color) in floors.iter().zip(colors.iter()) {
        let curve = WinCurve::for_floor(floor);
        let points: Vec<(f64, f64)> = curve.points.iter().map(|p| (p.price, p.probability)).collect();
        chart
            .draw_series(LineSeries::new(points.clone(), color))?
            .label(format!("floor {:.2}", floor))
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
        chart.draw_series(points.into_iter().map(|p| Circle::new(p, 3, color.filled())))?;
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;
    root.present()?;
    println!("Win curve chart saved to {}", filename);
    Ok(())
}

/// Equilibrium of the untrained prior next to the solver fallback
fn generate_equilibrium_chart(levels: usize) -> Result<(), Box<dyn Error>> {
    let prior = PayoffMatrix::prior(levels).solve_equilibrium();
    let fallback = fallback_distribution(levels);
    let max_p = prior.distribution.iter().chain(fallback.iter()).cloned().fold(0.0, f64::max);

    let filename = format!("{}/equilibrium_distribution.png", CHART_DIR);
    let root = BitMapBackend::new(&filename, (1200, 600)).into_drawing_area();
    root.fill(&WHITE)?;
    let (left, right) = root.split_horizontally(600);

    let panels = [
        (&left, format!("Prior equilibrium ({:?})", prior.source), prior.distribution.clone(), BLUE),
        (&right, "Fallback distribution".to_string(), fallback, RED),
    ];
    for (area, title, distribution, color) in panels.iter() {
        let mut chart = ChartBuilder::on(area)
            .caption(title, ("sans-serif", 22))
            .margin(10)
            .x_label_area_size(40)
            .y_label_area_size(50)
            .build_cartesian_2d(0.0..levels as f64, 0.0..max_p * 1.1)?;
        chart.configure_mesh().x_desc("Bid level").y_desc("Probability").draw()?;
        chart.draw_series(
            distribution
                .iter()
                .enumerate()
                .map(|(i, &p)| Rectangle::new([(i as f64 + 0.1, 0.0), (i as f64 + 0.9, p)], color.filled())),
        )?;
    }

    root.present()?;
    println!("Equilibrium chart saved to {}", filename);
    Ok(())
}

/// Histogram of slot floors and the highest competing bid in the simulated market
fn generate_market_histogram() -> Result<(), Box<dyn Error>> {
    const NUM_SAMPLES: usize = 10000;
    const NUM_BINS: usize = 50;

    let slots = vec![SlotSpec::new("chart", 300, 250)];
    let mut exchange = SimulatedExchange::new_advanced("charts", slots, MarketParams::default(), Utc::now(), 42)?;
    let mut floors = Vec::with_capacity(NUM_SAMPLES);
    let mut bids = Vec::with_capacity(NUM_SAMPLES);
    for (request, draw) in exchange.auctions(NUM_SAMPLES) {
        floors.push(request.floor_price);
        bids.push(draw.competing_bid);
    }

    let max_value = floors.iter().chain(bids.iter()).cloned().fold(0.0, f64::max);
    if max_value <= 0.0 {
        return Err("market produced no positive prices".into());
    }
    let bin_width = max_value / NUM_BINS as f64;
    let bin = |values: &[f64]| {
        let mut bins = vec![0u32; NUM_BINS];
        for &value in values {
            let idx = ((value / bin_width).floor() as usize).min(NUM_BINS - 1);
            bins[idx] += 1;
        }
        bins
    };
    let floor_bins = bin(&floors);
    let bid_bins = bin(&bids);
    let max_count = floor_bins.iter().chain(bid_bins.iter()).cloned().max().unwrap_or(0);

    let filename = format!("{}/market_histogram.png", CHART_DIR);
    let root = BitMapBackend::new(&filename, (900, 600)).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption("Floor and Competing Bid Distribution", ("sans-serif", 25))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(0.0..max_value, 0u32..max_count + max_count / 10)?;
    chart.configure_mesh().x_desc("Price").y_desc("Count").draw()?;

    chart
        .draw_series(floor_bins.iter().enumerate().map(|(i, &count)| {
            let x0 = i as f64 * bin_width;
            Rectangle::new([(x0, 0), (x0 + bin_width, count)], GREEN.mix(0.6).filled())
        }))?
        .label("Floor")
        .legend(|(x, y)| Rectangle::new([(x, y - 5), (x + 10, y + 5)], GREEN.filled()));

    let line: Vec<(f64, u32)> = bid_bins
        .iter()
        .enumerate()
        .map(|(i, &count)| ((i as f64 + 0.5) * bin_width, count))
        .collect();
    chart
        .draw_series(LineSeries::new(line, &BLUE))?
        .label("Competing bid")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;
    root.present()?;
    println!("Market histogram saved to {}", filename);
    Ok(())
}
