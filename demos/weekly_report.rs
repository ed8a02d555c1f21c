use mpi_dashboard::*;
use std::error::Error;
use std::path::PathBuf;

fn main() -> std::result::Result<(), Box<dyn Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let [payroll_path, appointments_path, rest @ ..] = args.as_slice() else {
        eprintln!("usage: weekly_report <payroll.xlsx> <appointments.xlsx> [registry.json]");
        std::process::exit(2);
    };

    let config = DashboardConfig {
        store_path: rest.first().map(PathBuf::from),
        ..DashboardConfig::default()
    };

    let payroll = std::fs::read(payroll_path)?;
    let appointments = std::fs::read(appointments_path)?;

    let mut dashboard = Dashboard::open(config)?;
    let rows = dashboard.build_daily_report(&payroll, &appointments)?;

    println!("📅 Daily MPI\n");
    println!(
        "{:<12} {:>10} {:>8} {:>9} {:>5} {:>5}  Tier",
        "Date", "Revenue", "Hours", "MPI", "Jobs", "Emp"
    );
    for row in &rows {
        println!(
            "{:<12} {:>10.2} {:>8.2} {:>9.2} {:>5} {:>5}  {}",
            row.date.format("%Y-%m-%d"),
            row.revenue,
            row.paid_hours,
            row.ratio,
            row.jobs,
            row.employee_count,
            row.tier
        );
    }

    let summary = PeriodSummary::from_rows(&rows);
    println!("\n📊 Period");
    println!("  MPI:              {:.2} $/h", summary.avg_ratio);
    println!("  Revenue:          {:.0} $", summary.total_revenue);
    println!("  Paid hours:       {:.1} h", summary.total_hours);
    println!("  Jobs:             {}", summary.total_jobs);
    println!("  Jobs / employee:  {:.1}", summary.avg_jobs_per_employee);
    println!("  Revenue / job:    {:.0} $", summary.revenue_per_job);

    if let Some(id) = dashboard.save_report(&rows)? {
        let view = ViewState {
            admin: false,
            report_id: Some(id.to_string()),
        };
        println!("\n💾 Saved report {}", id);
        if let Some(link) = view.share_url("http://localhost:8501") {
            println!("   Share: {}", link);
        }
    }

    let xlsx = dashboard.export_report(&rows)?;
    std::fs::write("mpi_report.xlsx", xlsx)?;
    println!("   Exported mpi_report.xlsx");

    dashboard.close()?;
    Ok(())
}
